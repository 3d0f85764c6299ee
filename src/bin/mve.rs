//! mve: command-line surface for the migration validation engine.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mve_core::api;
use mve_core::catalog::detect_language;
use mve_core::model::bundle::{CodeFile, InputBundle};
use mve_core::model::OverallStatus;
use mve_core::session::TechnologyContext;
use mve_core::{
    BehavioralConfig, Engine, EngineConfig, Error, Session, ValidationScope,
};

/// Exit codes: 0 success, 2 invalid input, 3 validation rejected,
/// 4 transport/infra failure, 5 budget/deadline exhausted.
const EXIT_INVALID_INPUT: u8 = 2;
const EXIT_REJECTED: u8 = 3;
const EXIT_INFRA: u8 = 4;
const EXIT_BUDGET: u8 = 5;

#[derive(Parser)]
#[command(name = "mve", about = "Migration validation engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a static validation over two file trees
    Validate {
        #[arg(long = "source-tech")]
        source_tech: String,
        #[arg(long = "target-tech")]
        target_tech: String,
        /// Directory or glob of source-side files
        #[arg(long = "source-files")]
        source_files: String,
        /// Directory or glob of target-side files
        #[arg(long = "target-files")]
        target_files: String,
        /// behavioral/full scopes need URLs and scenarios, so the CLI
        /// defaults to the widest static scope
        #[arg(long, default_value = "backend-logic")]
        scope: ValidationScope,
        /// Write the unified result JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run a behavioral validation against two live URLs
    Behavioral {
        #[arg(long = "source-url")]
        source_url: String,
        #[arg(long = "target-url")]
        target_url: String,
        /// Comma-separated scenario names
        #[arg(long)]
        scenarios: String,
        /// Per-scenario timeout in seconds
        #[arg(long, default_value_t = 120)]
        timeout: u64,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check the health of a running server
    Health {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
    },
}

fn exit_code_for(error: &Error) -> u8 {
    match error.code() {
        "validation-input" | "auth" => EXIT_INVALID_INPUT,
        "budget-exhausted" | "deadline-exceeded" => EXIT_BUDGET,
        _ => EXIT_INFRA,
    }
}

/// Collect files from a directory tree or a glob pattern.
fn collect_files(input: &str) -> Result<Vec<CodeFile>, Error> {
    let path = Path::new(input);
    let pattern = if path.is_dir() {
        format!("{}/**/*", input.trim_end_matches('/'))
    } else {
        input.to_string()
    };

    let mut files = Vec::new();
    let entries = glob::glob(&pattern)
        .map_err(|e| Error::invalid_input(format!("bad file pattern {pattern}: {e}")))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::invalid_input(format!("unreadable path: {e}")))?;
        if !entry.is_file() {
            continue;
        }
        let content = match std::fs::read_to_string(&entry) {
            Ok(content) => content,
            // Binary files are not analyzable source.
            Err(_) => continue,
        };
        let relative = entry.to_string_lossy().to_string();
        let language = detect_language(&relative);
        files.push(CodeFile::new(relative, language, content));
    }

    if files.is_empty() {
        return Err(Error::invalid_input(format!("no readable files in {input}")));
    }
    Ok(files)
}

async fn wait_for_result(
    engine: &Arc<Engine>,
    request_id: &str,
) -> Result<mve_core::UnifiedResult, Error> {
    loop {
        let session = engine
            .store
            .get(request_id)?
            .ok_or_else(|| Error::Internal("session vanished".into()))?;
        if session.status.is_terminal() {
            return match engine.store.result(request_id)? {
                Some(result) => Ok(result),
                None => match session.status {
                    mve_core::SessionStatus::TimedOut => Err(Error::deadline_exceeded(0)),
                    mve_core::SessionStatus::Cancelled => Err(Error::Cancelled),
                    status => Err(Error::Internal(format!(
                        "session ended {status} without a result"
                    ))),
                },
            };
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn write_result(
    result: &mve_core::UnifiedResult,
    output: Option<&PathBuf>,
) -> Result<(), Error> {
    let rendered = serde_json::to_string_pretty(result)?;
    match output {
        Some(path) => std::fs::write(path, rendered)
            .map_err(|e| Error::Internal(format!("failed to write {}: {e}", path.display()))),
        None => {
            println!("{rendered}");
            Ok(())
        }
    }
}

fn result_exit_code(result: &mve_core::UnifiedResult) -> ExitCode {
    match result.overall_status {
        OverallStatus::Approved | OverallStatus::ApprovedWithWarnings => ExitCode::SUCCESS,
        _ => ExitCode::from(EXIT_REJECTED),
    }
}

async fn run_validate(
    source_tech: String,
    target_tech: String,
    source_files: String,
    target_files: String,
    scope: ValidationScope,
    output: Option<PathBuf>,
) -> Result<ExitCode, Error> {
    let mut source = InputBundle::new();
    source.files = collect_files(&source_files)?;
    let mut target = InputBundle::new();
    target.files = collect_files(&target_files)?;

    let mut config = EngineConfig::from_env()?;
    config.database_url = ":memory:".to_string();
    let engine = Engine::new(config)?;
    engine.start()?;

    let session = Session::new(
        TechnologyContext::new(source_tech),
        TechnologyContext::new(target_tech),
        scope,
        source,
        target,
    )
    .with_priority(mve_core::session::Priority::Batch);

    let request_id = engine.scheduler.submit(session)?;
    tracing::info!(request_id, "validation submitted");

    let result = wait_for_result(&engine, &request_id).await?;
    engine.shutdown();

    write_result(&result, output.as_ref())?;
    eprintln!(
        "{}: fidelity {:.4}, {} discrepancies",
        result.overall_status,
        result.fidelity_score,
        result.discrepancies.len()
    );
    Ok(result_exit_code(&result))
}

async fn run_behavioral(
    source_url: String,
    target_url: String,
    scenarios: String,
    timeout: u64,
    output: Option<PathBuf>,
) -> Result<ExitCode, Error> {
    let scenarios: Vec<String> = scenarios
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    let mut config = EngineConfig::from_env()?;
    config.database_url = ":memory:".to_string();
    let engine = Engine::new(config)?;
    engine.start()?;

    let session = Session::new(
        TechnologyContext::new("web"),
        TechnologyContext::new("web"),
        ValidationScope::Behavioral,
        InputBundle::new().with_url(source_url),
        InputBundle::new().with_url(target_url),
    )
    .with_behavioral(BehavioralConfig::new(scenarios, timeout));

    let request_id = engine.scheduler.submit(session)?;
    let result = wait_for_result(&engine, &request_id).await?;
    engine.shutdown();

    write_result(&result, output.as_ref())?;
    Ok(result_exit_code(&result))
}

async fn run_serve(host: Option<String>, port: Option<u16>) -> Result<ExitCode, Error> {
    let mut config = EngineConfig::from_env()?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let engine = Engine::new(config.clone())?;
    engine.start()?;

    let app = api::router(Arc::clone(&engine));
    let address = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| Error::Config(format!("cannot bind {address}: {e}")))?;
    tracing::info!(%address, "serving validation API");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|e| Error::Internal(format!("server error: {e}")))?;

    engine.shutdown();
    Ok(ExitCode::SUCCESS)
}

async fn run_health(server: String) -> Result<ExitCode, Error> {
    let url = format!("{}/health", server.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .map_err(|e| Error::Internal(format!("health check failed: {e}")))?;
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| Error::Internal(format!("bad health response: {e}")))?;

    println!("status: {}", body["status"].as_str().unwrap_or("unknown"));
    if let Some(subsystems) = body.get("subsystems") {
        println!("subsystems: {}", serde_json::to_string_pretty(subsystems)?);
    }

    match body["recent_sessions"].as_array() {
        Some(sessions) if !sessions.is_empty() => {
            println!("recent sessions:");
            for session in sessions {
                println!(
                    "  {}  {:<12}  {:<14}  {}",
                    session["request_id"].as_str().unwrap_or("?"),
                    session["status"].as_str().unwrap_or("?"),
                    session["scope"].as_str().unwrap_or("?"),
                    session["created_at"].as_str().unwrap_or("?"),
                );
            }
        }
        _ => println!("recent sessions: none"),
    }

    if body["status"] == "healthy" {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_INFRA))
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
    let outcome = match cli.command {
        Command::Validate {
            source_tech,
            target_tech,
            source_files,
            target_files,
            scope,
            output,
        } => {
            run_validate(
                source_tech,
                target_tech,
                source_files,
                target_files,
                scope,
                output,
            )
            .await
        }
        Command::Behavioral {
            source_url,
            target_url,
            scenarios,
            timeout,
            output,
        } => run_behavioral(source_url, target_url, scenarios, timeout, output).await,
        Command::Serve { host, port } => run_serve(host, port).await,
        Command::Health { server } => run_health(server).await,
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}
