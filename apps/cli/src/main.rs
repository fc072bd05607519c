use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use client_core::{
    dispatch_command, spawn_command_worker, Collaborators, ControllerCommand, ControllerEvent,
    ControllerSettings, HttpServices, SessionController,
};
use shared::{
    domain::{DocumentId, RiskLevel, SuggestionLabel},
    protocol::{SentenceUnit, SessionConfig},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast, mpsc},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides `service_url` from the settings file.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    document_id: i64,
    #[arg(long, default_value = client_core::config::DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    /// Lowest risk level the session should include: low, medium or high.
    #[arg(long, default_value = "low")]
    min_risk: String,
    #[arg(long)]
    no_rule_based: bool,
}

#[derive(Debug, PartialEq)]
enum Input {
    Units,
    Select(usize),
    Apply(SuggestionLabel),
    Draft(String),
    Validate,
    Commit,
    Next,
    Skip,
    Flag,
    Analyze,
    Status,
    Complete,
    Help,
    Quit,
}

const HELP: &str = "commands: units | select <n> | apply <generated|rule_based> | draft <text> | \
validate | commit | next | skip | flag | analyze | status | complete | help | quit";

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match word {
        "units" | "ls" => Ok(Input::Units),
        "select" | "s" => rest
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(Input::Select)
            .ok_or_else(|| format!("select needs a unit number, got '{rest}'")),
        "apply" | "a" => rest
            .parse::<SuggestionLabel>()
            .map(Input::Apply),
        "draft" | "d" if !rest.is_empty() => Ok(Input::Draft(rest.to_string())),
        "draft" | "d" => Err("draft needs text".into()),
        "validate" | "v" => Ok(Input::Validate),
        "commit" | "c" => Ok(Input::Commit),
        "next" | "n" => Ok(Input::Next),
        "skip" => Ok(Input::Skip),
        "flag" => Ok(Input::Flag),
        "analyze" => Ok(Input::Analyze),
        "status" => Ok(Input::Status),
        "complete" => Ok(Input::Complete),
        "help" | "?" => Ok(Input::Help),
        "quit" | "exit" | "q" => Ok(Input::Quit),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn parse_risk_level(raw: &str) -> Result<RiskLevel> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "low" => Ok(RiskLevel::Low),
        "medium" => Ok(RiskLevel::Medium),
        "high" => Ok(RiskLevel::High),
        other => Err(anyhow!("unknown risk level '{other}'")),
    }
}

fn print_unit(unit: &SentenceUnit) {
    println!(
        "  [{}] ({:?}, {:?} {:.2}) {}",
        unit.index + 1,
        unit.status,
        unit.metrics.risk_level,
        unit.metrics.risk_score,
        unit.text
    );
}

fn print_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::PhaseChanged(_) => {}
        ControllerEvent::SessionUpdated(session) => {
            println!(
                "session: {}/{} reviewed, {} processed, {} skipped, {} flagged",
                session.position,
                session.total_units,
                session.processed_count,
                session.skipped_count,
                session.flagged_count
            );
            if session.is_terminal() {
                println!("all units reviewed; use 'complete' to finish the session");
            }
        }
        ControllerEvent::SuggestionsReady {
            suggestions,
            from_cache,
            ..
        } => {
            let origin = if *from_cache { " (cached)" } else { "" };
            println!("suggestions{origin}:");
            for variant in &suggestions.variants {
                println!(
                    "  {:<10} risk {:.2} sim {:.2}  {}",
                    variant.label, variant.predicted_risk, variant.similarity, variant.text
                );
            }
        }
        ControllerEvent::ValidationUpdated { result, .. } => {
            let verdict = if result.passed { "passed" } else { "failed" };
            println!(
                "validation {verdict} (similarity {:.2}): {}",
                result.similarity, result.message
            );
        }
        ControllerEvent::AnalysisReady { analysis, .. } => {
            println!(
                "analysis: {} (complexity {:.2})",
                analysis.summary, analysis.complexity
            );
            for clause in &analysis.clauses {
                println!("  - {clause}");
            }
        }
        ControllerEvent::Error(err) => println!("error: {err}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let args = Args::parse();

    let mut settings = ControllerSettings::load_from(&args.config, |key| std::env::var(key).ok())?;
    if let Some(server_url) = args.server_url {
        settings.service_url = server_url;
    }
    let config = SessionConfig {
        min_risk_level: parse_risk_level(&args.min_risk)?,
        include_rule_based: !args.no_rule_based,
    };

    let services = Arc::new(
        HttpServices::new(&settings.service_url, settings.request_timeout)
            .context("failed to set up service client")?,
    );
    info!(service_url = %services.base_url(), "cli: using review service");
    let controller = SessionController::new(Collaborators::from_backend(services), settings);

    let mut events = controller.subscribe_events();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "cli: event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    controller
        .start(DocumentId(args.document_id), config)
        .await
        .context("failed to start review session")?;
    for unit in controller.refresh_units().await? {
        print_unit(&unit);
    }
    println!("{HELP}");

    let (commands, rx) = mpsc::channel(64);
    let worker = spawn_command_worker(Arc::clone(&controller), rx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let input = match parse_input(&line) {
            Ok(input) => input,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        let command = match input {
            Input::Quit => break,
            Input::Help => {
                println!("{HELP}");
                continue;
            }
            Input::Units => {
                match controller.refresh_units().await {
                    Ok(units) => units.iter().for_each(print_unit),
                    Err(err) => println!("error: {err}"),
                }
                continue;
            }
            Input::Status => {
                let snapshot = controller.snapshot().await;
                println!("phase: {:?}", snapshot.phase);
                if let Some(unit) = &snapshot.active_unit {
                    print_unit(unit);
                }
                if !snapshot.draft.is_empty() {
                    println!("draft: {}", snapshot.draft);
                }
                if let Some(err) = &snapshot.last_error {
                    println!("last error: {err}");
                }
                continue;
            }
            Input::Select(number) => {
                let units = controller.units().await;
                let Some(unit) = units.into_iter().find(|unit| unit.index as usize + 1 == number)
                else {
                    println!("no unit {number}");
                    continue;
                };
                ControllerCommand::SelectUnit(unit)
            }
            Input::Analyze => {
                let Some(unit) = controller.snapshot().await.active_unit else {
                    println!("select a unit first");
                    continue;
                };
                ControllerCommand::RequestAnalysis(unit)
            }
            Input::Validate => {
                let draft = controller.snapshot().await.draft;
                ControllerCommand::ValidateCustom(draft)
            }
            Input::Apply(label) => ControllerCommand::ApplySuggestion(label),
            Input::Draft(text) => ControllerCommand::EditDraft(text),
            Input::Commit => ControllerCommand::ApplyCustom,
            Input::Next => ControllerCommand::Advance,
            Input::Skip => ControllerCommand::Skip,
            Input::Flag => ControllerCommand::Flag,
            Input::Complete => ControllerCommand::Complete,
        };
        if let Err(err) = dispatch_command(&commands, command) {
            println!("error: {err}");
        }
    }

    // Best effort: the worker also shuts down once the sender is dropped.
    let _ = dispatch_command(&commands, ControllerCommand::Shutdown);
    drop(commands);
    worker.await?;
    printer.abort();
    Ok(())
}
