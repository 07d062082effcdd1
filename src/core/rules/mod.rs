// Core rules module - declarative moderation rules and their compiled form.

pub mod rule_models;
pub mod rule_set;

pub use rule_models::*;
pub use rule_set::*;
