// Core classifier module - remote classifier port and the failover gateway.

pub mod classifier_gateway;
pub mod classifier_models;

pub use classifier_gateway::*;
pub use classifier_models::*;
