//! Data models

pub mod cluster;
pub mod deployment;
pub mod profile;
