//! Deployment module

pub mod deployer;
pub mod ecs;
pub mod fsm;
pub mod upload;
