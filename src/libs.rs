pub mod config;
pub mod contacts;
pub mod core;
pub mod exchange;
pub mod logging;
pub mod presence;
pub mod storage;
pub mod vanish;
