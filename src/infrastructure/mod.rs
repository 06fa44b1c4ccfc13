pub mod background;
pub mod database;
pub mod offline;
pub mod remote;
pub mod storage;
