//! Coverage reporting collaborators: webhook, directory and log sinks.

pub mod directory;
pub mod error;
pub mod log;
pub mod webhook;

pub use directory::DirectoryReporter;
pub use error::ReportError;
pub use log::LogReporter;
pub use webhook::{WebhookConfig, WebhookReporter};
