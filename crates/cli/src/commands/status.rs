//! Controller status and health commands

use adapt_lib::health::ComponentStatus;
use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ControllerState};
use crate::output::{
    color_debt, color_status, format_score, format_timestamp, print_heading, print_info, print_json,
    print_rows, OutputFormat,
};

/// Row for the per-family score table
#[derive(Tabled)]
struct FamilyRow {
    #[tabled(rename = "Family")]
    family: String,
    #[tabled(rename = "EMA Score")]
    score: String,
    #[tabled(rename = "Installed")]
    installed: String,
    #[tabled(rename = "Active")]
    active: String,
}

/// Row for the retraining queue table
#[derive(Tabled)]
struct QueueRow {
    #[tabled(rename = "Family")]
    family: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Cost")]
    cost: String,
    #[tabled(rename = "Sustainability")]
    sustainability: String,
    #[tabled(rename = "Queued At")]
    queued_at: String,
}

/// Row for the component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    failures: String,
    #[tabled(rename = "Last Success")]
    last_success: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn status_label(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}

/// Show the persisted controller state
pub async fn show_status(client: &ApiClient, max_debt: f64, format: OutputFormat) -> Result<()> {
    let state = client.state().await?;

    match format {
        OutputFormat::Json => print_json(&state)?,
        OutputFormat::Table => render_status(&state, max_debt),
    }

    Ok(())
}

fn render_status(state: &ControllerState, max_debt: f64) {
    print_heading("Controller Status");
    println!("Instance:            {}", state.instance.cyan());
    println!("Run Mode:            {}", state.run_mode);
    let version = state
        .active
        .version_id
        .map_or_else(|| "bundled".to_string(), |v| format!("v{}", v));
    println!(
        "Active Model:        {} ({})",
        state.active.family.to_string().cyan(),
        version
    );
    println!("Updated:             {}", format_timestamp(state.active.updated_at));
    println!("Records Consumed:    {}", state.cursor);
    println!();

    println!("{}", "Energy Debt".bold());
    println!("{}", "-".repeat(50));
    println!("Debt:                {}", color_debt(state.debt.debt, max_debt));
    println!("Max Debt:            {:.3}", max_debt);
    if state.debt.is_recovering() {
        println!(
            "Recovery:            {} cycles remaining",
            state.debt.recovery_cycles_remaining.to_string().yellow()
        );
    } else {
        println!("Recovery:            {}", "inactive".green());
    }
    println!();

    println!("{}", "Performance".bold());
    println!("{}", "-".repeat(50));
    println!("EMA Score:           {}", format_score(state.ema_score));
    if let Some(snapshot) = &state.last_snapshot {
        println!("Accuracy:            {:.3}", snapshot.accuracy);
        println!("Normalized Energy:   {:.3}", snapshot.normalized_energy);
        println!("Mean Latency:        {:.2}ms", snapshot.mean_latency * 1000.0);
        println!("Last Batch:          {} records", snapshot.records);
    }
    println!();

    let rows: Vec<FamilyRow> = adapt_lib::models::ModelKind::ALL
        .iter()
        .map(|family| FamilyRow {
            family: family.to_string(),
            score: format_score(state.family_scores.get(family).copied()),
            installed: state
                .active
                .installed
                .get(family)
                .map_or_else(|| "-".to_string(), |v| format!("v{}", v)),
            active: if *family == state.active.family {
                "✓".green().to_string()
            } else {
                String::new()
            },
        })
        .collect();
    print_rows(rows, "No model families reported");
    println!();

    match &state.drift_reference {
        Some(reference) => print_info(&format!(
            "Drift reference: {} samples captured {}, last KL divergence {:.4}",
            reference.samples,
            format_timestamp(reference.captured_at),
            reference.kl_divergence
        )),
        None => print_info("No drift reference captured yet"),
    }

    if !state.retrain_queue.is_empty() {
        println!();
        println!("{}", "Retraining Queue".bold());
        let rows: Vec<QueueRow> = state
            .retrain_queue
            .iter()
            .map(|job| QueueRow {
                family: job.family.to_string(),
                region: job.quote.region.clone(),
                cost: format!("{:.3}", job.quote.cost),
                sustainability: format!("{:.2}", job.quote.sustainability),
                queued_at: format_timestamp(job.queued_at),
            })
            .collect();
        print_rows(rows, "Retraining queue is empty");
    }
}

/// Show component health and readiness
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;
    let readiness = client.readiness().await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "health": health,
            "readiness": readiness,
        }))?,
        OutputFormat::Table => {
            print_heading("Controller Health");
            println!("Overall:             {}", color_status(status_label(health.status)));
            let ready = if readiness.ready { "ready" } else { "not ready" };
            println!("Readiness:           {}", color_status(ready));
            if let Some(reason) = &readiness.reason {
                println!("Reason:              {}", reason);
            }
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(status_label(component.status)),
                    // In a row / since start
                    failures: format!(
                        "{} / {}",
                        component.consecutive_failures, component.failures_total
                    ),
                    last_success: component
                        .last_success
                        .map_or_else(|| "never".to_string(), format_timestamp),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            print_rows(rows, "No components registered");
        }
    }

    Ok(())
}
