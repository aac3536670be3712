//! `list`

use crate::context::AppContext;
use r2r_core::TagReport;
use r2r_foundation::{CatalogueEntry, ExtensionDefinition, Result, EXIT_FAILURE};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub tags: bool,
    pub refresh: bool,
    pub clear_cache: bool,
}

pub async fn list(ctx: &AppContext, options: ListOptions) -> Result<i32> {
    let mut resolver = ctx.resolver()?;

    if options.clear_cache {
        resolver.clear_cache()?;
        println!("Registry cache cleared ({})", resolver.cache().path().display());
    }

    // ========================================================================
    // Configured extensions
    // ========================================================================
    let extensions = &ctx.config.extensions;
    match &ctx.config_path {
        Some(path) => println!("\nConfigured extensions ({})\n", path.display()),
        None => println!("\nConfigured extensions (no configuration file)\n"),
    }
    if extensions.is_empty() {
        println!("  none");
    } else {
        print_definitions(extensions);
    }

    // ========================================================================
    // Tags
    // ========================================================================
    let mut failed = false;
    if options.tags {
        println!("\nTags\n");
        for def in extensions {
            if def.load_local {
                println!("  {:<16} (local image, registry not consulted)", def.name);
                continue;
            }
            match resolver.tags(def, options.refresh).await {
                Ok(report) => print_tags(&report),
                Err(e) => {
                    eprintln!("  {:<16} error: {}", def.name, e);
                    failed = true;
                }
            }
        }
    }

    // ========================================================================
    // Registry catalogue
    // ========================================================================
    // served from cache unless --refresh; a plain listing never calls the registry
    if ctx.config.registry.organization.is_empty() {
        println!("\nNo registry organization configured; skipping catalogue.");
    } else if options.refresh {
        match resolver.refresh_catalogue().await {
            Ok(entries) => print_catalogue(ctx, &entries, ""),
            Err(e) => {
                warn!("Registry catalogue unavailable: {}", e);
                eprintln!("\nRegistry catalogue unavailable: {}", e);
                if let Some(hint) = e.hint() {
                    eprintln!("hint: {}", hint);
                }
            }
        }
    } else {
        match resolver.cached_catalogue() {
            Some((entries, true)) => print_catalogue(ctx, &entries, ""),
            Some((entries, false)) => {
                print_catalogue(ctx, &entries, " (cached, stale; use --refresh)")
            }
            None => println!(
                "\nRegistry catalogue not cached; run `r2r list --refresh` to fetch it."
            ),
        }
    }
    println!();

    Ok(if failed { EXIT_FAILURE } else { 0 })
}

fn print_catalogue(ctx: &AppContext, entries: &[CatalogueEntry], note: &str) {
    println!("\nPublished in {}{}\n", ctx.config.registry.organization, note);
    if entries.is_empty() {
        println!("  none");
    }
    for entry in entries {
        let configured = ctx.config.extensions.iter().any(|d| d.name == entry.name);
        let marker = if configured { "*" } else { " " };
        println!("{} {:<16} {}", marker, entry.name, entry.image_path);
    }
}

fn print_definitions(extensions: &[ExtensionDefinition]) {
    println!("{:<16} {:<48} {:<14} {}", "NAME", "IMAGE", "PULL", "DESCRIPTION");
    println!("{}", "-".repeat(90));
    for def in extensions {
        let image = if def.load_local {
            format!("{} (local)", def.image)
        } else {
            def.image.clone()
        };
        println!(
            "{:<16} {:<48} {:<14} {}",
            def.name,
            image,
            def.pull_policy.to_string(),
            def.description.as_deref().unwrap_or("")
        );
    }
}

fn print_tags(report: &TagReport) {
    let age = if report.stale { " (stale)" } else { "" };
    println!(
        "  {:<16} fetched {}{}",
        report.extension,
        report.fetched_at.format("%Y-%m-%d %H:%M:%S UTC"),
        age
    );
    for tag in &report.tags {
        let marker = if report.latest_pinned.as_deref() == Some(tag.as_str()) {
            " <- latest pinned"
        } else {
            ""
        };
        println!("      {}{}", tag, marker);
    }
}
