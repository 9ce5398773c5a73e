pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod identity;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod service;
pub mod wal;
