//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses
//! the draftloom-core domain logic through [`AppContext`].

pub mod config;
pub mod outline;
pub mod resume;
pub mod run;
pub mod status;

use std::sync::Arc;

use draftloom_core::workflow::{ProgressEvent, ProgressSink};
use draftloom_core::{CancelFlag, Database, DraftConfig, HttpTextGenerator, TextGenerator};

/// What every command needs: the database and the effective configuration.
#[derive(Clone)]
pub struct AppContext {
    pub db: Database,
    pub config: DraftConfig,
}

/// Open the SQLite database and load the configuration.
pub fn init_context(db_path: &str, config_path: Option<&str>) -> Result<AppContext, String> {
    let config = load_config(config_path)?;
    let db = Database::open(db_path)
        .map_err(|e| format!("Failed to open database '{}': {}", db_path, e))?;
    Ok(AppContext { db, config })
}

/// The configuration at `path`, or the defaults when no path is given.
pub fn load_config(path: Option<&str>) -> Result<DraftConfig, String> {
    match path {
        Some(path) => DraftConfig::from_file(path).map_err(|e| e.to_string()),
        None => Ok(DraftConfig::default()),
    }
}

/// HTTP generator for the configured provider. Loads `.env` files first so
/// `${DRAFTLOOM_API_KEY}` style references resolve.
pub fn build_generator(config: &DraftConfig) -> Result<Arc<dyn TextGenerator>, String> {
    load_dotenv();
    let provider = config.resolved_provider();
    if provider.api_key.trim().is_empty() {
        return Err("No API key configured (set DRAFTLOOM_API_KEY or provider.api_key)".to_string());
    }
    let generator = HttpTextGenerator::new(provider, config.generation.call_timeout())
        .map_err(|e| e.to_string())?;
    Ok(Arc::new(generator))
}

/// Raise `cancel` on the first Ctrl-C.
pub fn cancel_on_ctrl_c(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling, waiting for in-flight calls to finish...");
            cancel.cancel();
        }
    });
}

/// Prints step transitions to stderr while a task runs.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_event(&self, _task_id: &str, event: &ProgressEvent) {
        match event {
            ProgressEvent::StepStarted { step, progress } => {
                eprintln!("[{:>3}%] ▶ {}", progress, step);
            }
            ProgressEvent::StepReplayed { step, progress } => {
                eprintln!("[{:>3}%] ↺ {} (from checkpoint)", progress, step);
            }
            ProgressEvent::StepSkipped { step, progress } => {
                eprintln!("[{:>3}%] ⏭ {} (disabled)", progress, step);
            }
            ProgressEvent::StepCompleted { step, progress } => {
                eprintln!("[{:>3}%] ✓ {}", progress, step);
            }
            ProgressEvent::NodeCompleted {
                title,
                status,
                done,
                total,
                progress,
                ..
            } => {
                eprintln!("[{:>3}%]     {}/{} {} ({})", progress, done, total, title, status);
            }
            ProgressEvent::Finished { status, progress } => {
                eprintln!("[{:>3}%] {}", progress, status.as_str());
            }
        }
    }
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Load .env and .env.local files for environment variables.
fn load_dotenv() {
    // .env.local wins over .env; variables already set win over both
    for filename in &[".env.local", ".env"] {
        let path = std::path::Path::new(filename);
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                    .unwrap_or(value);
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
        tracing::info!("Loaded environment from '{}'", filename);
    }
}
