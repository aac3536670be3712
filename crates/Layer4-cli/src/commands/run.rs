//! `run` / `interactive`

use crate::context::AppContext;
use crate::terminal::RawModeGuard;
use r2r_foundation::Result;
use r2r_task::{
    ContainerSession, ContainerSpec, ImageProvisioner, SessionIo, SessionMode, SessionOptions,
};
use tracing::{info, warn};

/// Resolve, provision and run one extension session
pub async fn run(ctx: &AppContext, extension: &str, mode: SessionMode) -> Result<i32> {
    let def = ctx.config.extension(extension)?;

    // 정책 검사는 데몬 접속 전에
    let mut resolver = ctx.resolver()?;
    let resolution = resolver.resolve(def, ctx.strict).await?;
    info!(
        "Resolved {} to {} ({:?})",
        def.name, resolution.reference, resolution.source
    );

    let daemon = ctx.daemon().await?;
    ImageProvisioner::new(daemon.clone())
        .with_credentials(ctx.pull_credentials())
        .ensure_present(&resolution.reference, def.pull_policy, resolution.is_local())
        .await?;

    let payload: &[String] = match mode {
        SessionMode::Run => ctx.invocation.payload_args.as_slice(),
        SessionMode::Interactive => {
            if ctx.invocation.has_payload() {
                warn!(
                    "Ignoring {} argument(s) after the extension name in interactive mode",
                    ctx.invocation.payload_args.len()
                );
            }
            &[]
        }
    };
    let spec = ContainerSpec::for_extension(def, &resolution.reference, mode, payload, &ctx.host())?;

    let options = SessionOptions {
        stop_timeout: ctx.config.session.stop_timeout(),
        nested: ctx.env.is_nested(),
        auto_remove_children: def.auto_remove_children,
        strip_ansi: def.strip_ansi,
    };

    let _raw = RawModeGuard::enter(mode == SessionMode::Interactive && ctx.env.stdin_is_terminal);
    let report = ContainerSession::new(daemon, options)
        .run(&spec, SessionIo::host())
        .await?;

    if !report.leaked.is_empty() {
        warn!(
            "{} container(s) left behind by {}",
            report.leaked.len(),
            def.name
        );
    }
    Ok(report.exit_code)
}
