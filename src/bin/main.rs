use clap::{Parser, ValueEnum};
use research_orchestrator::{
    agent::Orchestrator,
    audit::AuditLog,
    config::Settings,
    events::{CancelSignal, EventEmitter, RunEvent},
    files,
    models::{Task, TaskConfig, TerminationReason},
    presets::{self, PRESET_TASKS},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Final answer as plain text
    Plain,
    /// Self-contained HTML report
    Report,
}

/// Multi-specialist financial research from the command line
#[derive(Debug, Parser)]
#[command(name = "orchestrator", version, about)]
struct Cli {
    /// Task text, or the name of a built-in example
    task: Option<String>,

    /// Maximum worker iterations (1..=50)
    #[arg(long)]
    max_iterations: Option<u32>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,

    /// Attach a text or source file as context (repeatable)
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// List built-in example tasks and exit
    #[arg(long)]
    list_examples: bool,

    /// Write the HTML report to this path
    #[arg(long, value_name = "PATH")]
    report_out: Option<PathBuf>,
}

fn print_progress(event: &RunEvent) {
    match event {
        RunEvent::Start { run_id, max_iterations, .. } => {
            eprintln!("run {} started (max {} iterations)", run_id, max_iterations);
        }
        RunEvent::Step { iteration, worker, tool_calls, status, .. } => {
            eprintln!("  [{}] {} - {:?}, {} tool call(s)", iteration, worker, status, tool_calls);
        }
        RunEvent::ToolCall { worker, tool, ok, .. } => {
            eprintln!("      {} -> {} ({})", worker, tool, if *ok { "ok" } else { "failed" });
        }
        RunEvent::Done { termination_reason, iterations, .. } => {
            eprintln!("done: {} after {} iteration(s)", termination_reason, iterations);
        }
        RunEvent::Error { message, .. } => eprintln!("error: {}", message),
        RunEvent::Cancelled { reason, .. } => eprintln!("cancelled: {}", reason),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.list_examples {
        for preset in PRESET_TASKS {
            println!("{:<18} {}", preset.name, preset.task);
        }
        return ExitCode::SUCCESS;
    }

    let Some(input) = cli.task.as_deref() else {
        eprintln!("No task given. Pass a task or one of --list-examples.");
        return ExitCode::from(1);
    };

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    let mut file_contexts = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        match files::extract(path) {
            Ok(ctx) => file_contexts.push(ctx),
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::from(1);
            }
        }
    }

    let want_report = cli.format == OutputFormat::Report || cli.report_out.is_some();
    let config = TaskConfig {
        max_iterations: cli
            .max_iterations
            .unwrap_or(settings.policy.default_max_iterations),
        generate_report: want_report,
    };
    let task = match Task::new(presets::resolve(input), config) {
        Ok(task) => Arc::new(task.with_files(file_contexts)),
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(1);
        }
    };

    let orchestrator = match Orchestrator::from_settings(&settings, Arc::new(AuditLog::new())) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("Failed to configure orchestrator: {}", e);
            return ExitCode::from(1);
        }
    };

    let cancel = CancelSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; cancelling run");
                cancel.cancel("interrupted");
            }
        });
    }

    let (emitter, mut rx) = EventEmitter::channel(settings.policy.event_buffer, cancel.clone());
    let mut emitter = emitter.with_tool_calls(true);

    let drive = async {
        let outcome = orchestrator.run(task, None, &mut emitter, &cancel).await;
        drop(emitter);
        outcome
    };
    let progress = async {
        while let Some(event) = rx.recv().await {
            print_progress(&event);
            if event.is_terminal() {
                break;
            }
        }
    };
    let (outcome, ()) = tokio::join!(drive, progress);

    info!(run_id = %outcome.run_id, elapsed_ms = outcome.execution_time_ms, "Run finished");

    if let (Some(path), Some(html)) = (cli.report_out.as_ref(), outcome.report_html.as_ref()) {
        if let Err(e) = std::fs::write(path, html) {
            eprintln!("Failed to write report to {}: {}", path.display(), e);
        } else {
            eprintln!("report written to {}", path.display());
        }
    }

    match cli.format {
        OutputFormat::Report if cli.report_out.is_none() => {
            if let Some(html) = &outcome.report_html {
                println!("{}", html);
            }
        }
        _ => {
            if let Some(output) = &outcome.final_output {
                println!("{}", output);
            }
        }
    }

    match outcome.termination_reason {
        TerminationReason::Synthesized
        | TerminationReason::IterationLimit => ExitCode::SUCCESS,
        TerminationReason::FatalError => ExitCode::from(1),
        TerminationReason::Cancelled => ExitCode::from(2),
    }
}
