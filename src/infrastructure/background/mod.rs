pub mod tokio_registrar;
pub mod unsupported;

pub use tokio_registrar::TokioBackgroundRegistrar;
pub use unsupported::UnsupportedBackgroundRegistrar;
