// The core module contains all moderation business logic.
// Each component gets its own submodule and owns the storage traits it needs;
// nothing in here knows about SQLite, HTTP or the console front-end.

#[path = "rules/mod.rs"]
pub mod rules;

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "classifier/mod.rs"]
pub mod classifier;

#[path = "ledger/mod.rs"]
pub mod ledger;

#[path = "rate/rate_guard.rs"]
pub mod rate;

#[path = "guard/mod.rs"]
pub mod guard;

pub mod text;
