// Core ledger module - persisted violation counting, bans and history.

pub mod ledger_models;
pub mod ledger_service;

pub use ledger_models::*;
pub use ledger_service::*;
