pub mod migrations;
pub mod storage_sqlite;
