//! HTTP API over the deployment registry

pub mod handlers;
pub mod serve;
pub mod state;
