//! Local threshold file inspection

use adapt_lib::config::ThresholdConfig;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{print_json, print_rows, print_success, print_warning, OutputFormat};

/// Row for the thresholds table
#[derive(Tabled)]
struct ThresholdRow {
    #[tabled(rename = "Threshold")]
    name: String,
    #[tabled(rename = "Effective")]
    effective: String,
    #[tabled(rename = "Default")]
    default: String,
}

/// Result of checking a threshold document
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub invalid_fields: Vec<String>,
    pub unknown_keys: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.invalid_fields.is_empty() && self.unknown_keys.is_empty()
    }
}

/// Parse a threshold document strictly: malformed JSON is an error
pub fn check_document(data: &[u8]) -> Result<(ThresholdConfig, ValidationReport)> {
    let document: serde_json::Value =
        serde_json::from_slice(data).context("Thresholds file is not valid JSON")?;
    let config: ThresholdConfig = serde_json::from_value(document.clone())
        .context("Thresholds file has fields of the wrong type")?;

    let report = ValidationReport {
        invalid_fields: config.invalid_fields(),
        unknown_keys: ThresholdConfig::unknown_keys(&document),
    };
    Ok((config, report))
}

/// Show the thresholds the controller would use for `path`
pub fn show_thresholds(path: &Path, format: OutputFormat) -> Result<()> {
    let effective = match std::fs::read(path) {
        Ok(data) => ThresholdConfig::from_json_or_default(&data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            print_warning(&format!("{} not found, the controller uses defaults", path.display()));
            ThresholdConfig::default()
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    match format {
        OutputFormat::Json => print_json(&effective)?,
        OutputFormat::Table => {
            let effective_map = serde_json::to_value(&effective)?;
            let default_map = serde_json::to_value(ThresholdConfig::default())?;
            let rows: Vec<ThresholdRow> = effective_map
                .as_object()
                .into_iter()
                .flatten()
                .map(|(name, value)| {
                    let default = default_map.get(name).cloned().unwrap_or_default();
                    let effective = if *value == default {
                        value.to_string()
                    } else {
                        value.to_string().cyan().to_string()
                    };
                    ThresholdRow {
                        name: name.clone(),
                        effective,
                        default: default.to_string(),
                    }
                })
                .collect();
            print_rows(rows, "No thresholds defined");
        }
    }

    Ok(())
}

/// Validate a thresholds file; fails when the controller would substitute
/// any value
pub fn validate_thresholds(path: &Path) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let (_, report) = check_document(&data)?;

    for key in &report.unknown_keys {
        print_warning(&format!("Unknown key '{}' is ignored", key));
    }
    if !report.invalid_fields.is_empty() {
        anyhow::bail!(
            "Out-of-range thresholds would be replaced by defaults: {}",
            report.invalid_fields.join(", ")
        );
    }

    print_success(&format!("{} is valid", path.display()));
    Ok(())
}
