//! `flowpilot run`: execute a plan file and stream its events.
//!
//! Shows a progress bar driven by the run's progress percentage, prints step
//! transitions above it, and ends with a table of step results. Ctrl+C
//! cancels the run at the next step boundary.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use futures_util::{FutureExt, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};

use flowpilot_core::workflow::definition::load_plan_file;
use flowpilot_types::event::{WorkflowEvent, WorkflowEventType};
use flowpilot_types::run::{RunSnapshot, RunStatus, StepStatus};

use crate::cli::RunArgs;
use crate::state::{ActuatorSource, AppState};

/// Parse `--context` into a JSON object.
pub fn parse_context(raw: Option<&str>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => {
            serde_json::from_str(raw).context("--context must be a JSON object")
        }
    }
}

pub async fn run_plan(args: RunArgs, json: bool, quiet: bool) -> Result<()> {
    let definition = load_plan_file(&args.file)
        .with_context(|| format!("invalid plan file {}", args.file.display()))?;
    let context = parse_context(args.context.as_deref())?;

    let source = if args.dry_run {
        ActuatorSource::Scripted(args.script.clone())
    } else {
        ActuatorSource::Http
    };
    let state = AppState::init(source, args.endpoint.clone()).await?;
    let engine = &state.engine;

    let mut events = engine.event_bus().subscribe_stream();
    let plan_id = engine.create_plan(definition).await?;
    let plan = engine.get_plan(plan_id).await?;
    let run_id = engine.execute(plan_id, context).await?;
    tracing::info!(%plan_id, %run_id, "run submitted");

    let progress = (!json && !quiet).then(|| progress_bar(plan.name()));

    let finished = engine.wait(run_id);
    tokio::pin!(finished);
    let mut cancel_requested = false;

    let snapshot = loop {
        tokio::select! {
            snapshot = &mut finished => break snapshot?,

            Some(event) = events.next() => {
                if let Some(bar) = progress.as_ref().filter(|_| event.is_for_run(run_id)) {
                    bar.set_position(engine.status(run_id).await?.progress_percentage as u64);
                    bar.println(describe_event(&event));
                }
            }

            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                if let Err(e) = engine.cancel(run_id).await {
                    tracing::warn!(error = %e, "cancel request rejected");
                }
            }
        }
    };

    if let Some(bar) = &progress {
        while let Some(Some(event)) = events.next().now_or_never() {
            if event.is_for_run(run_id) {
                bar.println(describe_event(&event));
            }
        }
        bar.set_position(snapshot.progress_percentage as u64);
        bar.finish_and_clear();
    }

    let order: Vec<String> = plan
        .definition
        .walk_steps()
        .iter()
        .map(|s| s.id.clone())
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else if !quiet {
        print_summary(&snapshot, &order);
    }

    match snapshot.status {
        RunStatus::Completed => Ok(()),
        status => bail!(
            "run {} {status}{}",
            snapshot.run_id,
            snapshot
                .error
                .as_deref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default()
        ),
    }
}

fn progress_bar(plan_name: &str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} {msg} [{bar:30.cyan/blue}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(plan_name.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(80));
    bar
}

/// One display line for a run event.
pub fn describe_event(event: &WorkflowEvent) -> String {
    let step = event.step_id.as_deref().unwrap_or("-");
    let attempt = event.data.get("attempt").and_then(Value::as_u64);
    let error = event.data.get("error").and_then(Value::as_str);

    match event.event_type {
        WorkflowEventType::StepStarted => format!("  {} {step}", style("▶").cyan()),
        WorkflowEventType::StepCompleted => format!("  {} {step}", style("✓").green()),
        WorkflowEventType::StepRetrying => format!(
            "  {} {step} attempt {} failed, retrying: {}",
            style("↻").yellow(),
            attempt.unwrap_or_default(),
            error.unwrap_or("unknown error")
        ),
        WorkflowEventType::StepFailed => format!(
            "  {} {step}: {}",
            style("✗").red(),
            error.unwrap_or("unknown error")
        ),
        WorkflowEventType::StepSkipped => format!(
            "  {} {step} skipped: {}",
            style("-").dim(),
            event
                .data
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("dependencies not met")
        ),
        WorkflowEventType::ExecutionPaused => format!("  {} paused", style("⏸").yellow()),
        WorkflowEventType::ExecutionResumed => format!("  {} resumed", style("▶").cyan()),
        WorkflowEventType::ExecutionCancelled => format!("  {} cancelling", style("■").red()),
        other => format!("  {} {other:?}", style("·").dim()),
    }
}

fn status_cell(status: StepStatus) -> Cell {
    let color = match status {
        StepStatus::Completed => Color::Green,
        StepStatus::Failed => Color::Red,
        StepStatus::Skipped => Color::DarkGrey,
        StepStatus::Retrying | StepStatus::Running => Color::Yellow,
        StepStatus::Pending => Color::White,
    };
    Cell::new(status.to_string()).fg(color)
}

/// Step results in plan order. Steps that were never reached are omitted.
pub fn results_table(snapshot: &RunSnapshot, order: &[String]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Step").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Attempts").fg(Color::White),
        Cell::new("Duration").fg(Color::White),
        Cell::new("Error").fg(Color::White),
    ]);

    for id in order {
        let Some(result) = snapshot.step(id) else {
            continue;
        };
        let duration = result
            .duration_ms
            .map(|ms| format!("{ms} ms"))
            .unwrap_or_else(|| "-".to_string());
        let error = result.error.as_deref().unwrap_or("-");
        let error = if error.chars().count() > 60 {
            format!("{}...", error.chars().take(57).collect::<String>())
        } else {
            error.to_string()
        };
        table.add_row(vec![
            Cell::new(id),
            status_cell(result.status),
            Cell::new(result.attempts),
            Cell::new(duration),
            Cell::new(error),
        ]);
    }
    table
}

fn print_summary(snapshot: &RunSnapshot, order: &[String]) {
    let headline = match snapshot.status {
        RunStatus::Completed => style("✓ completed").green().bold(),
        RunStatus::Cancelled => style("■ cancelled").yellow().bold(),
        _ => style("✗ failed").red().bold(),
    };
    println!();
    println!(
        "  {} {} ({}%)",
        style(&snapshot.plan_name).cyan(),
        headline,
        snapshot.progress_percentage.round()
    );
    println!("  Run: {}", snapshot.run_id);
    if let Some(error) = &snapshot.error {
        println!("  Error: {}", style(error).red());
    }
    println!();
    println!("{}", results_table(snapshot, order));
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use flowpilot_types::run::StepResult;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn context_must_be_an_object() {
        assert!(parse_context(None).unwrap().is_empty());
        assert_eq!(
            parse_context(Some(r#"{"user":"ada"}"#)).unwrap()["user"],
            "ada"
        );
        assert!(parse_context(Some("[1,2]")).is_err());
    }

    #[test]
    fn describes_retry_with_attempt_and_error() {
        let event = WorkflowEvent {
            event_type: WorkflowEventType::StepRetrying,
            plan_id: Uuid::now_v7(),
            run_id: Some(Uuid::now_v7()),
            step_id: Some("login".to_string()),
            sequence: 3,
            timestamp: chrono::Utc::now(),
            data: json!({ "attempt": 1, "error": "element not found" }),
        };
        let line = console::strip_ansi_codes(&describe_event(&event)).to_string();
        assert!(line.contains("login attempt 1 failed"));
        assert!(line.contains("element not found"));
    }

    #[test]
    fn table_follows_plan_order_and_skips_unreached() {
        let mut failed = StepResult::pending("b");
        failed.status = StepStatus::Failed;
        failed.attempts = 3;
        failed.error = Some("boom".to_string());
        let mut step_results = HashMap::new();
        step_results.insert("b".to_string(), failed);
        let mut done = StepResult::pending("a");
        done.status = StepStatus::Completed;
        done.attempts = 1;
        done.duration_ms = Some(12);
        step_results.insert("a".to_string(), done);

        let snapshot = RunSnapshot {
            run_id: Uuid::now_v7(),
            plan_id: Uuid::now_v7(),
            plan_name: "t".to_string(),
            status: RunStatus::Failed,
            step_results,
            context: Map::new(),
            error: Some("step 'b' failed: boom".to_string()),
            progress_percentage: 100.0,
            start_time: None,
            end_time: None,
        };
        let order = vec!["a".to_string(), "b".to_string(), "nested".to_string()];
        let rendered = results_table(&snapshot, &order).to_string();
        let a = rendered.find("12 ms").unwrap();
        let b = rendered.find("boom").unwrap();
        assert!(a < b);
        assert!(!rendered.contains("nested"));
    }
}
