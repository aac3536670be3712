//! Subcommand implementations
//!
//! Each command returns the process exit code; errors are reported by `main`.

mod install;
mod list;
mod run;

pub use install::install;
pub use list::{list, ListOptions};
pub use run::run;
