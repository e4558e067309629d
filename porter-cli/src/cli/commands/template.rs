//! Template command handler

use anyhow::{Context as _, Result};
use colored::*;

use crate::archive;
use crate::cli::{Context, TemplateArgs};
use crate::export::export_templates;

pub fn handle_template_command(context: &Context, args: TemplateArgs) -> Result<()> {
    let mut sink = archive::create_sink(&args.out)
        .with_context(|| format!("Failed to create archive: {}", args.out.display()))?;

    let written = export_templates(&context.registry, sink.as_mut())
        .context("Failed to write import templates")?;

    println!(
        "{} {} template units to {}",
        "Wrote".green().bold(),
        written,
        args.out.display().to_string().cyan()
    );
    Ok(())
}
