pub mod cli;
pub mod load_config;
pub mod progress;
pub mod prompt;
pub mod shutdown;
pub mod upload;

pub use cli::{run, run_with_classifier, Cli, Commands};
