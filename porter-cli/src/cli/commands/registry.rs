//! Registry command handler

use anyhow::{Context as _, Result};
use colored::*;
use serde::Serialize;

use crate::cli::{Context, RegistryArgs};
use crate::graph::{DeferredEdge, DependencyCategory, GraphEdge};
use crate::registry::{EntityRegistry, PivotEntry};

/// One ordered entry as printed
#[derive(Debug, Serialize)]
struct EntryView<'a> {
    position: usize,
    type_id: &'a str,
    table: &'a str,
    category: DependencyCategory,
    is_static: bool,
    is_tenant_based: bool,
    essential: bool,
    tenant_root: bool,
    depends_on: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct RegistryView<'a> {
    entries: Vec<EntryView<'a>>,
    pivots: &'a [PivotEntry],
    deferred: &'a [DeferredEdge],
    external: &'a [GraphEdge],
}

fn view(registry: &EntityRegistry) -> RegistryView<'_> {
    let entries = registry
        .ordered_entries()
        .iter()
        .map(|entry| {
            let mut depends_on: Vec<&str> = registry
                .graph()
                .dependencies_of(entry.type_id())
                .into_iter()
                .collect();
            depends_on.sort_unstable();
            EntryView {
                position: entry.position,
                type_id: entry.type_id(),
                table: entry.table_name(),
                category: registry.categorize(entry.type_id()),
                is_static: entry.is_static(),
                is_tenant_based: entry.descriptor.is_tenant_based,
                essential: entry.is_essential(),
                tenant_root: entry.is_tenant_root(),
                depends_on,
            }
        })
        .collect();

    RegistryView {
        entries,
        pivots: registry.pivots(),
        deferred: registry.deferred_edges(),
        external: registry.external_edges(),
    }
}

pub fn handle_registry_command(context: &Context, args: RegistryArgs) -> Result<()> {
    let view = view(&context.registry);

    if args.json {
        let json = serde_json::to_string_pretty(&view).context("Failed to format JSON output")?;
        println!("{}", json);
        return Ok(());
    }

    println!("{}", "Entity order".bold());
    for entry in &view.entries {
        let mut flags = Vec::new();
        if entry.tenant_root {
            flags.push("tenant".magenta());
        }
        if entry.essential {
            flags.push("essential".yellow());
        }
        if entry.is_static {
            flags.push("static".cyan());
        }
        let flags = flags
            .iter()
            .map(|f| format!("[{}]", f))
            .collect::<Vec<_>>()
            .join(" ");

        let depends = if entry.depends_on.is_empty() {
            String::new()
        } else {
            format!("→ {}", entry.depends_on.join(", "))
        };

        println!(
            "  {:>3}. {} {:<32} {} {}",
            entry.position + 1,
            entry.category.symbol(),
            entry.type_id,
            flags,
            depends.dimmed()
        );
    }

    if !view.pivots.is_empty() {
        println!();
        println!("{}", "Pivots".bold());
        for pivot in view.pivots {
            println!(
                "  {:<40} {} ↔ {} {}",
                pivot.table_name(),
                pivot.owner,
                pivot.target,
                format!("(after {})", pivot.after).dimmed()
            );
        }
    }

    if !view.deferred.is_empty() {
        println!();
        println!("{}", "Deferred edges".bold());
        for deferred in view.deferred {
            println!(
                "  {}.{} → {} {}",
                deferred.edge.entity,
                deferred.edge.column,
                deferred.edge.target,
                format!("({:?})", deferred.reason).dimmed()
            );
        }
    }

    if !view.external.is_empty() {
        println!();
        println!("{}", "Unregistered targets (nulled on import)".bold());
        for edge in view.external {
            println!("  {}.{} → {}", edge.entity, edge.column, edge.target);
        }
    }

    Ok(())
}
