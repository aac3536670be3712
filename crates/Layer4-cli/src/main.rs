//! r2r CLI - Main entry point

mod cli;
mod commands;
mod context;
mod terminal;

use clap::Parser;
use cli::{Args, Command};
use commands::ListOptions;
use context::AppContext;
use r2r_foundation::{ParsedInvocation, EXIT_FAILURE};
use r2r_task::SessionMode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // payload는 clap에 넘기지 않음
    let invocation = ParsedInvocation::from_env();
    let args = Args::parse_from(invocation.framework_argv());

    // Initialize logging (stdout belongs to the container)
    let filter = args.log_filter(|key| std::env::var(key).ok());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli::DEFAULT_LOG_FILTER)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if !invocation.stripped.is_empty() {
        tracing::debug!(
            "Dropped redirection residue at argument positions {:?}",
            invocation.stripped
        );
    }

    let code = match run(args, invocation).await {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            e.downcast_ref::<r2r_foundation::Error>()
                .map(|e| e.exit_code())
                .unwrap_or(EXIT_FAILURE)
        }
    };
    std::process::exit(code);
}

async fn run(args: Args, invocation: ParsedInvocation) -> anyhow::Result<i32> {
    let ctx = AppContext::load(&args, invocation)?;

    let code = match args.command {
        Command::Run { extension } => commands::run(&ctx, &extension, SessionMode::Run).await?,
        Command::Interactive { extension } => {
            commands::run(&ctx, &extension, SessionMode::Interactive).await?
        }
        Command::List {
            tags,
            refresh,
            clear_cache,
        } => {
            commands::list(
                &ctx,
                ListOptions {
                    tags,
                    refresh,
                    clear_cache,
                },
            )
            .await?
        }
        Command::Install { extension } => commands::install(&ctx, extension.as_deref()).await?,
    };
    Ok(code)
}

/// `error: <message>` plus a hint for errors the user can act on
fn report_error(e: &anyhow::Error) {
    eprintln!("error: {:#}", e);
    if let Some(hint) = e
        .downcast_ref::<r2r_foundation::Error>()
        .and_then(|e| e.hint())
    {
        eprintln!("hint: {}", hint);
    }
}
