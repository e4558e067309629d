//! Import command handler

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context as _, Result};
use colored::*;
use dialoguer::Confirm;
use is_terminal::IsTerminal;

use crate::archive;
use crate::cli::{Context, ImportArgs};
use crate::export::UnitKind;
use crate::import::{EntityStatus, ImportEngine, ImportOptions, ImportReport, Outcome};

/// Failing rows printed per entity type
const SHOWN_ERRORS: usize = 5;

pub async fn handle_import_command(context: &Context, args: ImportArgs) -> Result<()> {
    if !args.archive.exists() {
        anyhow::bail!("Archive does not exist: {}", args.archive.display());
    }

    if args.cleanup && !args.yes && !confirm_cleanup(context, args.tenant.as_deref())? {
        println!("{}", "Import cancelled".yellow());
        return Ok(());
    }

    let pool = context.connect().await?;
    let mut source = archive::open_source(&args.archive)
        .with_context(|| format!("Failed to open archive: {}", args.archive.display()))?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; stopping after the current entity type");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let options = ImportOptions {
        cleanup: args.cleanup,
        target_tenant: args.tenant.clone(),
        persist_remap: args.persist_remap,
        cancel: Some(cancel),
    };

    println!(
        "Importing {} into {}",
        args.archive.display().to_string().cyan(),
        context.config.database_url().cyan()
    );
    let start = Instant::now();

    let report = ImportEngine::new(&context.registry, &pool, options)
        .run(source.as_mut())
        .await
        .context("Import failed")?;

    print_report(&report);
    println!("  {:.2}s", start.elapsed().as_secs_f64());

    let totals = report.totals();
    if totals.failed > 0 {
        anyhow::bail!("{} entity type(s) failed to import", totals.failed);
    }
    Ok(())
}

fn confirm_cleanup(context: &Context, tenant: Option<&str>) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("--cleanup needs --yes when not running interactively");
    }

    let target = match tenant {
        Some(tenant) => format!("all rows of tenant '{}'", tenant),
        None => "all tenant data".to_string(),
    };
    let prompt = format!(
        "This removes {} from {} before importing. Continue?",
        target,
        context.config.database_url()
    );

    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

fn status_symbol(status: &EntityStatus) -> ColoredString {
    match status.outcome {
        Outcome::Imported => "✓".green(),
        Outcome::Skipped => "-".dimmed(),
        Outcome::Failed => "✗".red(),
        Outcome::Cancelled => "!".yellow(),
    }
}

fn print_report(report: &ImportReport) {
    for status in &report.statuses {
        // Keep the listing short: absent units only show up in verbose logs
        if status.outcome == Outcome::Skipped {
            continue;
        }

        let name = format!("{:<40}", status.name);
        let name = match status.kind {
            UnitKind::Entity => name.normal(),
            UnitKind::Pivot => name.dimmed(),
        };
        let summary = match status.outcome {
            Outcome::Failed => status.summary().red(),
            _ => status.summary().normal(),
        };
        println!("  {} {} {}", status_symbol(status), name, summary);

        for err in status.errors.iter().take(SHOWN_ERRORS) {
            println!("      {}", err.to_string().dimmed());
        }
        if status.errors.len() > SHOWN_ERRORS {
            println!(
                "      {}",
                format!("... and {} more", status.errors.len() - SHOWN_ERRORS).dimmed()
            );
        }
    }

    let totals = report.totals();
    println!();
    println!(
        "{} tenant {}: {} imported, {} skipped, {} failed, {} cancelled",
        "Imported".green().bold(),
        report.tenant_id.bright_green(),
        totals.imported,
        totals.skipped,
        if totals.failed > 0 {
            totals.failed.to_string().red()
        } else {
            totals.failed.to_string().normal()
        },
        totals.cancelled
    );
    if report.patched + report.unpatched > 0 {
        println!(
            "  {} deferred references patched, {} left empty",
            report.patched, report.unpatched
        );
    }
}
