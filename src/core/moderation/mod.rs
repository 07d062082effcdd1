// Core moderation module - the message decision pipeline.

pub mod local_filter;
pub mod moderation_models;
pub mod moderation_service;

pub use local_filter::*;
pub use moderation_models::*;
pub use moderation_service::*;
