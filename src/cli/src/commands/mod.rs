pub mod config;
pub mod dedup;
pub mod lease;
pub mod running;
