//! Cluster Deployer Library
//!
//! Provisions container clusters in a cloud account and tears them down
//! again, tracking every deployment in a process-wide registry.

pub mod app;
pub mod cloud;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod registry;
pub mod server;
pub mod storage;
pub mod utils;
