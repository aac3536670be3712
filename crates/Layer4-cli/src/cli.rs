//! Command-line surface
//!
//! clap only ever sees the framework portion of the argument vector; the
//! payload of `run` is split off beforehand and never re-parsed.

use clap::{Parser, Subcommand};
use r2r_foundation::env_detect::LOG_LEVEL_ENV;
use std::path::PathBuf;

/// Log filter used when nothing else is configured
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// r2r - run versioned, containerized extensions as native commands
#[derive(Parser, Debug)]
#[command(name = "r2r")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (default: R2R_CONFIG, ./.r2r/config.yaml, user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `r2r_task=debug`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Enable info logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Require content-addressed image references (always on under CI)
    #[arg(long, global = true)]
    pub strict: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run an extension; everything after its name is passed to the container
    Run {
        /// Extension name from the configuration
        extension: String,
    },
    /// Open the extension's shell in an interactive container
    Interactive {
        /// Extension name from the configuration
        extension: String,
    },
    /// List configured extensions and what the registry publishes
    List {
        /// Show known tags of each configured extension
        #[arg(long)]
        tags: bool,
        /// Ignore cached registry data
        #[arg(long)]
        refresh: bool,
        /// Drop the registry cache before listing
        #[arg(long)]
        clear_cache: bool,
    },
    /// Resolve and pull extension images ahead of time
    Install {
        /// Only this extension (default: all configured)
        extension: Option<String>,
    },
}

impl Args {
    /// Effective log filter
    ///
    /// `--log-level`, `--debug`, `--verbose`, `R2R_LOG_LEVEL`, `RUST_LOG`, then `warn`.
    pub fn log_filter<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = &self.log_level {
            return level.clone();
        }
        if self.debug {
            return "debug".to_string();
        }
        if self.verbose {
            return "info".to_string();
        }
        [LOG_LEVEL_ENV, "RUST_LOG"]
            .iter()
            .filter_map(|key| lookup(key))
            .find(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r2r_foundation::ParsedInvocation;
    use std::collections::HashMap;

    fn parse(argv: &[&str]) -> (Args, ParsedInvocation) {
        let invocation = ParsedInvocation::parse(argv.iter().copied());
        let args = Args::try_parse_from(invocation.framework_argv()).unwrap();
        (args, invocation)
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_run_payload_never_reaches_clap() {
        let (args, invocation) = parse(&["r2r", "run", "pwsh", "--help", "-c", "Get-Date"]);
        assert_eq!(
            args.command,
            Command::Run {
                extension: "pwsh".into()
            }
        );
        assert_eq!(invocation.payload_args, vec!["--help", "-c", "Get-Date"]);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_global_flags_before_subcommand() {
        let (args, _) = parse(&["r2r", "--strict", "-c", "ci.yaml", "--debug", "interactive", "py"]);
        assert!(args.strict);
        assert!(args.debug);
        assert_eq!(args.config, Some(PathBuf::from("ci.yaml")));
        assert_eq!(
            args.command,
            Command::Interactive {
                extension: "py".into()
            }
        );
    }

    #[test]
    fn test_list_flags_with_redirection_residue() {
        let (args, invocation) = parse(&["r2r", "list", "--tags", "2", "--refresh"]);
        assert_eq!(
            args.command,
            Command::List {
                tags: true,
                refresh: true,
                clear_cache: false
            }
        );
        assert_eq!(invocation.stripped, vec![3]);
    }

    #[test]
    fn test_install_optional_extension() {
        let (args, _) = parse(&["r2r", "install"]);
        assert_eq!(args.command, Command::Install { extension: None });

        let (args, _) = parse(&["r2r", "install", "pwsh"]);
        assert_eq!(
            args.command,
            Command::Install {
                extension: Some("pwsh".into())
            }
        );
    }

    #[test]
    fn test_run_without_extension_is_rejected() {
        let invocation = ParsedInvocation::parse(["r2r", "run"]);
        assert!(Args::try_parse_from(invocation.framework_argv()).is_err());
    }

    #[test]
    fn test_log_filter_precedence() {
        let (mut args, _) = parse(&["r2r", "list"]);
        assert_eq!(args.log_filter(env(&[])), "warn");
        assert_eq!(args.log_filter(env(&[("RUST_LOG", "trace")])), "trace");
        assert_eq!(
            args.log_filter(env(&[("RUST_LOG", "trace"), (LOG_LEVEL_ENV, "info")])),
            "info"
        );

        args.verbose = true;
        assert_eq!(args.log_filter(env(&[(LOG_LEVEL_ENV, "error")])), "info");
        args.debug = true;
        assert_eq!(args.log_filter(env(&[])), "debug");
        args.log_level = Some("r2r_task=trace".into());
        assert_eq!(args.log_filter(env(&[])), "r2r_task=trace");
    }

    #[test]
    fn test_blank_env_filter_ignored() {
        let (args, _) = parse(&["r2r", "list"]);
        assert_eq!(
            args.log_filter(env(&[(LOG_LEVEL_ENV, " "), ("RUST_LOG", "debug")])),
            "debug"
        );
    }
}
