//! `flowpilot validate` and `flowpilot lint`.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use serde_json::json;

use flowpilot_core::workflow::definition::load_plan_file;
use flowpilot_core::workflow::lint::lint_plan;
use flowpilot_types::plan::PlanDefinition;

fn load(file: &Path) -> Result<PlanDefinition> {
    load_plan_file(file).with_context(|| format!("invalid plan file {}", file.display()))
}

pub fn validate(file: &Path, json: bool, quiet: bool) -> Result<()> {
    let def = load(file)?;
    let total = def.walk_steps().len();

    if json {
        let out = json!({
            "valid": true,
            "name": def.name,
            "steps": def.steps.len(),
            "total_steps": total,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !quiet {
        println!();
        println!(
            "  {} Plan '{}' is valid",
            style("✓").green().bold(),
            style(&def.name).cyan()
        );
        println!("  Steps: {} top-level, {} total", def.steps.len(), total);
        if let Some(objective) = &def.objective {
            println!("  Objective: {objective}");
        }
        println!();
    }
    Ok(())
}

pub fn lint(file: &Path, json: bool, quiet: bool) -> Result<()> {
    let def = load(file)?;
    let lints = lint_plan(&def);

    if json {
        let messages: Vec<String> = lints.iter().map(ToString::to_string).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "name": def.name, "warnings": messages }))?
        );
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    println!();
    if lints.is_empty() {
        println!(
            "  {} No problems found in '{}'",
            style("✓").green().bold(),
            style(&def.name).cyan()
        );
    } else {
        println!(
            "  {} {} warning(s) in '{}'",
            style("!").yellow().bold(),
            lints.len(),
            style(&def.name).cyan()
        );
        for lint in &lints {
            println!("    - {lint}");
        }
    }
    println!();
    Ok(())
}
