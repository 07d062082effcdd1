// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "rules/mod.rs"]
pub mod rules;

#[path = "ledger/mod.rs"]
pub mod ledger;

#[path = "classifier/mod.rs"]
pub mod classifier;
