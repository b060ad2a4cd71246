//! Model version registry commands

use adapt_lib::models::ModelKind;
use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{format_bytes, format_timestamp, print_json, print_rows, OutputFormat};

/// Row for the versions table
#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Created")]
    created_at: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Checksum")]
    checksum: String,
    #[tabled(rename = "Installed")]
    installed: String,
}

/// List the stored versions of one family
pub async fn list_versions(client: &ApiClient, family: ModelKind, format: OutputFormat) -> Result<()> {
    let result = client.versions(family).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            println!(
                "{} {}",
                "Versions of".bold(),
                result.family.to_string().cyan().bold()
            );
            println!();

            let rows: Vec<VersionRow> = result
                .versions
                .iter()
                .map(|v| VersionRow {
                    version: format!("v{}", v.version_id),
                    created_at: format_timestamp(v.created_at),
                    samples: v.training_samples,
                    size: format_bytes(v.size_bytes),
                    checksum: v.checksum.chars().take(12).collect(),
                    installed: if result.active_version == Some(v.version_id) {
                        "✓".green().to_string()
                    } else {
                        String::new()
                    },
                })
                .collect();
            let total = rows.len();
            print_rows(rows, "No versions stored for this family");
            if total > 0 {
                println!("\nTotal: {} versions", total);
            }
        }
    }

    Ok(())
}
