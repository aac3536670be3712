//! `install`

use crate::context::AppContext;
use r2r_foundation::{ExtensionDefinition, Result};
use r2r_task::ImageProvisioner;

/// Resolve every selected extension, then make its image present locally
///
/// All pinning violations are reported together before anything is pulled.
pub async fn install(ctx: &AppContext, extension: Option<&str>) -> Result<i32> {
    let defs: &[ExtensionDefinition] = match extension {
        Some(name) => std::slice::from_ref(ctx.config.extension(name)?),
        None => &ctx.config.extensions,
    };
    if defs.is_empty() {
        println!("No extensions configured.");
        return Ok(0);
    }

    let mut resolver = ctx.resolver()?;
    let resolutions = resolver.validate_all(defs, ctx.strict).await?;

    let daemon = ctx.daemon().await?;
    let provisioner = ImageProvisioner::new(daemon).with_credentials(ctx.pull_credentials());

    for (def, resolution) in defs.iter().zip(&resolutions) {
        provisioner
            .ensure_present(&resolution.reference, def.pull_policy, resolution.is_local())
            .await?;
        println!("✓ {:<16} {}", def.name, resolution.reference);
    }
    Ok(0)
}
