//! Integration tests for the draftloom-cli commands.
//!
//! These tests exercise the same code paths as the binary, with a
//! file-backed SQLite database in a temp directory and an in-process
//! text generator standing in for the provider.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use draftloom_cli::commands::{self, run::RunOptions, AppContext};
use draftloom_core::config::LengthBounds;
use draftloom_core::generation::{PromptContext, RequestKind};
use draftloom_core::store::TaskStore;
use draftloom_core::{
    CancelFlag, Database, DraftConfig, GenerationCallError, TextGenerator, WorkflowStatus,
};

const OUTLINE: &str = "# Scope\n## Site works\n## Structures\n# Schedule\n";

/// Answers every request with a sentence about the section. While `broken`
/// is set, leaf requests fail.
struct StubGenerator {
    broken: AtomicBool,
}

impl StubGenerator {
    fn healthy() -> Arc<Self> {
        Arc::new(Self {
            broken: AtomicBool::new(false),
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            broken: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, ctx: &PromptContext) -> Result<String, GenerationCallError> {
        if ctx.kind == RequestKind::Leaf && self.broken.load(Ordering::SeqCst) {
            return Err(GenerationCallError::InvalidResponse("HTTP 500".to_string()));
        }
        Ok(format!("The {} section is described here.", ctx.title))
    }

    fn name(&self) -> &str {
        "stub"
    }
}

fn test_config() -> DraftConfig {
    let mut config = DraftConfig::default();
    config.retry.max_attempts = 1;
    config.retry.jitter = false;
    config.task_retry.max_retries = 0;
    config.validation.leaf = LengthBounds::new(1, 500);
    config.validation.parent = LengthBounds::new(1, 500);
    config
}

struct Fixture {
    dir: tempfile::TempDir,
    ctx: AppContext,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_path = dir.path().join("draftloom.db");
        let db = Database::open(db_path.to_str().unwrap()).expect("Failed to open database");
        std::fs::write(dir.path().join("source.txt"), "Build a depot.\n▲ Reuse existing slabs").unwrap();
        std::fs::write(dir.path().join("outline.md"), OUTLINE).unwrap();
        Self {
            ctx: AppContext {
                db,
                config: test_config(),
            },
            dir,
        }
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().to_string()
    }

    fn options(&self) -> RunOptions {
        RunOptions {
            document: self.path("source.txt"),
            outline: Some(self.path("outline.md")),
            project_id: "depot".to_string(),
            no_differentiation: true,
            no_validation: false,
            output: Some(self.path("out.json")),
        }
    }
}

#[tokio::test]
async fn test_run_writes_output_and_records_task() {
    let fx = Fixture::new();
    let options = fx.options();

    let state = commands::run::execute(&fx.ctx, &options, StubGenerator::healthy(), CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(state.status, WorkflowStatus::Succeeded);
    commands::run::report(&state, options.output.as_deref()).unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(fx.path("out.json")).unwrap()).unwrap();
    assert_eq!(written["status"], "succeeded");
    assert_eq!(written["keyRequirements"][0], "▲ Reuse existing slabs");
    let numbers: Vec<&str> = written["sections"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["number"].as_str().unwrap())
        .collect();
    assert_eq!(numbers, vec!["1", "1.1", "1.2", "2"]);

    let task = TaskStore::new(fx.ctx.db.clone())
        .require(&state.task_id)
        .await
        .unwrap();
    assert_eq!(task.status.as_str(), "success");
    assert_eq!(task.project_id, "depot");

    commands::status::status(&fx.ctx, &state.task_id).await.unwrap();
    commands::status::tasks(&fx.ctx, Some("depot")).await.unwrap();
    commands::status::checkpoints(&fx.ctx, &state.task_id).await.unwrap();
}

#[tokio::test]
async fn test_failed_run_can_be_resumed() {
    let fx = Fixture::new();
    let options = fx.options();

    let failed = commands::run::execute(&fx.ctx, &options, StubGenerator::broken(), CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(failed.status, WorkflowStatus::Failed);
    let err = commands::run::report(&failed, None).unwrap_err();
    assert!(err.contains("draftloom resume --task-id"));

    let resumed = commands::resume::execute(
        &fx.ctx,
        &failed.task_id,
        StubGenerator::healthy(),
        CancelFlag::new(),
    )
    .await
    .unwrap();
    assert_eq!(resumed.status, WorkflowStatus::Succeeded);
    assert_eq!(resumed.sections.len(), 4);
}

#[tokio::test]
async fn test_resume_unknown_task_fails() {
    let fx = Fixture::new();
    let err = commands::resume::execute(&fx.ctx, "missing", StubGenerator::healthy(), CancelFlag::new())
        .await
        .unwrap_err();
    assert!(err.contains("missing"));
}

#[tokio::test]
async fn test_checkpoints_of_unknown_task_is_error() {
    let fx = Fixture::new();
    assert!(commands::status::checkpoints(&fx.ctx, "missing").await.is_err());
    assert!(commands::status::status(&fx.ctx, "missing").await.is_err());
}

#[test]
fn test_outline_command_parses_file() {
    let fx = Fixture::new();
    commands::outline::run(&fx.path("outline.md"), 4).unwrap();

    std::fs::write(fx.path("empty.md"), "no headings here\n").unwrap();
    let err = commands::outline::run(&fx.path("empty.md"), 4).unwrap_err();
    assert!(err.to_lowercase().contains("outline"));
}

#[test]
fn test_config_round_trips_through_file() {
    let fx = Fixture::new();
    std::fs::write(
        fx.path("draftloom.yaml"),
        "generation:\n  max_concurrent_tasks: 2\nworkflow:\n  enable_differentiation: false\n",
    )
    .unwrap();

    let config = commands::load_config(Some(&fx.path("draftloom.yaml"))).unwrap();
    assert_eq!(config.generation.max_concurrent_tasks, 2);
    assert!(!config.workflow.enable_differentiation);
    assert_eq!(config.retry.max_attempts, 3);
    commands::config::show(Some(&fx.path("draftloom.yaml"))).unwrap();

    std::fs::write(fx.path("bad.yaml"), "generation:\n  max_concurrent_tasks: 0\n").unwrap();
    assert!(commands::load_config(Some(&fx.path("bad.yaml"))).is_err());
}
