// Implementations of the rule document store.

pub mod json_rule_store;

pub use json_rule_store::JsonRuleStore;
