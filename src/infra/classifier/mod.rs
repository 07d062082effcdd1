// Remote classifier clients.

pub mod openrouter_classifier;

pub use openrouter_classifier::{OpenRouterClassifier, DEFAULT_OPENROUTER_BASE_URL};
