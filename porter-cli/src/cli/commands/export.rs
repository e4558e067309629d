//! Export command handler

use std::time::Instant;

use anyhow::{Context as _, Result};
use colored::*;

use crate::archive;
use crate::cli::{Context, ExportArgs};
use crate::export::{ExportEngine, ExportScope, UnitKind};

pub async fn handle_export_command(context: &Context, args: ExportArgs) -> Result<()> {
    let registry = &context.registry;

    // Validate --only before touching the database
    for name in &args.only {
        let known = registry.entry_by_table(name).is_some()
            || registry.pivots().iter().any(|p| p.table_name() == name);
        if !known {
            anyhow::bail!("Unknown table '{}' in --only; see 'porter registry'", name);
        }
    }

    let pool = context.connect().await?;
    let mut sink = archive::create_sink(&args.out)
        .with_context(|| format!("Failed to create archive: {}", args.out.display()))?;

    let scope = ExportScope {
        tenant_id: args.tenant.clone(),
        use_placeholder: !args.no_placeholder,
        only: (!args.only.is_empty()).then_some(args.only),
    };

    println!(
        "Exporting tenant {} to {}",
        scope.tenant_id.bright_green().bold(),
        args.out.display().to_string().cyan()
    );
    let start = Instant::now();

    let report = ExportEngine::new(registry, &pool)
        .export(&scope, sink.as_mut())
        .await
        .context("Export failed")?;

    for unit in &report.units {
        let name = format!("{:<40}", unit.name);
        let label = match unit.kind {
            UnitKind::Entity => name.normal(),
            UnitKind::Pivot => name.dimmed(),
        };
        println!("  {} {} {}", "✓".green(), label, unit.rows);
    }

    println!();
    println!(
        "{} {} rows in {} units ({:.2}s)",
        "Exported".green().bold(),
        report.total_rows(),
        report.units.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
