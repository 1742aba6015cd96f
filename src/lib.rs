pub mod access;
pub mod activity;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod server;
pub mod storage;
