use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "elite_sync=debug,info";

/// ログ設定の初期化
///
/// `RUST_LOG` が設定されていればそれを優先する。二重初期化はエラーにせず無視する。
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_can_be_called_twice() {
        init_logging();
        init_logging();
        tracing::debug!(target: "offline::sync", "logging initialized");
    }
}
