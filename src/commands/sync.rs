use std::path::Path;

use anyhow::Result;
use colored::*;

use skein::sync::SyncReport;

pub fn run(
    config_path: Option<&Path>,
    connector: Option<&str>,
    full: Option<bool>,
    strict: bool,
    json: bool,
) -> Result<()> {
    let mut skein = super::open(config_path)?;
    if connector.is_none() && skein.connector_names().is_empty() {
        if !json {
            println!(
                "{}",
                "No connectors configured (see connectors: in skein.yaml)".yellow()
            );
        } else {
            println!("[]");
        }
        return Ok(());
    }

    let reports = skein.sync(connector, full)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    if strict {
        for report in &reports {
            report.ensure_complete()?;
        }
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    let mode = if report.full { "full" } else { "incremental" };
    println!("{} {} ({})", "Sync".bold(), report.connector.cyan(), mode);
    println!(
        "  created {}, updated {}, unchanged {}, edges {}",
        report.created.to_string().green(),
        report.updated.to_string().green(),
        report.unchanged,
        report.edges_created
    );
    if report.unresolved > 0 {
        println!(
            "  {} {} link(s) unresolved, will retry",
            "⚠".yellow(),
            report.unresolved
        );
    }
    if report.failed > 0 {
        println!("  {} {} record(s) failed", "✗".red(), report.failed);
        for err in &report.errors {
            println!("    {} {}", err.external_id.red(), err.message.dimmed());
        }
    }
    println!();
}
