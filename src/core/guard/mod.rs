// Core guard module - per-message enforcement pipeline.

pub mod guard_models;
pub mod message_guard;

pub use guard_models::*;
pub use message_guard::*;
