//! Invocation parsing
//!
//! Splits the raw argument vector into the part r2r interprets itself and the
//! payload forwarded to the container. Everything from the boundary onward is
//! passed through verbatim, even tokens that look like r2r flags.
//!
//! ```text
//!  r2r --debug run pwsh -Command Get-Date
//!  └──────── framework ───────┘└──── payload ────┘
//!                             ▲ boundary_index = 4
//! ```

use tracing::debug;

/// Subcommands whose next token names an extension and whose remaining tokens are payload
pub const TARGET_SUBCOMMANDS: &[&str] = &["run", "interactive"];

/// Subcommands without a payload
pub const PLAIN_SUBCOMMANDS: &[&str] = &["list", "install", "help"];

/// Framework flags that consume the following token
pub const VALUE_FLAGS: &[&str] = &["--config", "-c", "--log-level"];

/// Framework switches; a numeric token right after one is redirection residue
pub const SWITCH_FLAGS: &[&str] = &[
    "--tags",
    "--refresh",
    "--clear-cache",
    "--strict",
    "--debug",
    "-d",
    "--verbose",
    "-v",
];

/// Result of splitting the argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInvocation {
    pub binary_name: String,
    pub subcommand: Option<String>,
    pub extension_name: Option<String>,
    /// Framework-level tokens after the binary name, subcommand and extension included
    pub framework_args: Vec<String>,
    /// Tokens forwarded to the container, in original order
    pub payload_args: Vec<String>,
    /// Index in the original vector where the payload starts
    pub boundary_index: Option<usize>,
    /// Original indices of dropped redirection artifacts
    pub stripped: Vec<usize>,
}

impl ParsedInvocation {
    /// Parse a full argument vector (binary name first)
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = args.into_iter().map(Into::into).collect();
        parse_argv(&argv)
    }

    /// Parse the current process arguments
    pub fn from_env() -> Self {
        Self::parse(std::env::args())
    }

    /// Vector handed to the flag parser: binary plus framework tokens
    pub fn framework_argv(&self) -> Vec<String> {
        std::iter::once(self.binary_name.clone())
            .chain(self.framework_args.iter().cloned())
            .collect()
    }

    pub fn has_payload(&self) -> bool {
        !self.payload_args.is_empty()
    }
}

fn parse_argv(argv: &[String]) -> ParsedInvocation {
    let binary_name = argv.first().cloned().unwrap_or_else(|| "r2r".to_string());

    let mut framework_args = Vec::new();
    let mut subcommand: Option<String> = None;
    let mut extension_name = None;
    let mut payload_args = Vec::new();
    let mut boundary_index = None;
    let mut stripped = Vec::new();

    let mut after_switch = false;
    let mut i = 1;
    while i < argv.len() {
        let token = argv[i].as_str();

        if after_switch && is_numeric(token) {
            debug!("Dropping redirection artifact '{}' at position {}", token, i);
            stripped.push(i);
            after_switch = false;
            i += 1;
            continue;
        }
        after_switch = false;

        if VALUE_FLAGS.contains(&token) {
            // The value is taken even if it looks like a subcommand
            framework_args.push(token.to_string());
            if let Some(value) = argv.get(i + 1) {
                framework_args.push(value.clone());
            }
            i += 2;
            continue;
        }

        if SWITCH_FLAGS.contains(&token) {
            framework_args.push(token.to_string());
            after_switch = true;
            i += 1;
            continue;
        }

        if subcommand.is_none() {
            if TARGET_SUBCOMMANDS.contains(&token) {
                subcommand = Some(token.to_string());
                framework_args.push(token.to_string());
                if let Some(name) = argv.get(i + 1) {
                    extension_name = Some(name.clone());
                    framework_args.push(name.clone());
                    boundary_index = Some(i + 2);
                    payload_args = argv[i + 2..].to_vec();
                }
                break;
            }
            if PLAIN_SUBCOMMANDS.contains(&token) {
                subcommand = Some(token.to_string());
            }
        }

        framework_args.push(token.to_string());
        i += 1;
    }

    ParsedInvocation {
        binary_name,
        subcommand,
        extension_name,
        framework_args,
        payload_args,
        boundary_index,
        stripped,
    }
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}
