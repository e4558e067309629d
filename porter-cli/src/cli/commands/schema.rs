//! Schema command handler

use anyhow::{Context as _, Result};
use colored::*;

use crate::cli::Context;
use crate::storage::schema::create_schema;

pub async fn handle_schema_command(context: &Context) -> Result<()> {
    let pool = context.connect().await?;
    let mut conn = pool
        .acquire()
        .await
        .context("Failed to acquire database connection")?;

    let created = create_schema(&mut conn, &context.registry).await?;

    println!(
        "{} {} tables in {}",
        "Ensured".green().bold(),
        created,
        context.config.database_url().cyan()
    );
    Ok(())
}
