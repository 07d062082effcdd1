// Console layer - stdin/stdout front-end for the moderation pipeline.

pub mod commands;
pub mod session;

pub use session::ConsoleSession;

/// Error type returned by console command handlers.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
