//! Draftloom CLI: drive hierarchical document generation from the shell.
//!
//! Runs the draftloom-core workflow against a local SQLite database and
//! the configured text-generation provider.

use clap::{Parser, Subcommand};

use draftloom_cli::commands;

/// Draftloom: hierarchical document generation with resumable checkpoints
#[derive(Parser)]
#[command(name = "draftloom", version, about = "Draftloom: hierarchical document generation")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "DRAFTLOOM_DB_PATH", default_value = "draftloom.db", global = true)]
    db: String,

    /// Path to a YAML configuration file (defaults apply when omitted)
    #[arg(long, env = "DRAFTLOOM_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a document from a source requirements file
    Run {
        /// Source document (plain text)
        #[arg(long)]
        document: String,
        /// Outline file to use instead of generating one
        #[arg(long)]
        outline: Option<String>,
        /// Project the task belongs to
        #[arg(long, default_value = "default")]
        project_id: String,
        /// Skip the differentiation pass
        #[arg(long)]
        no_differentiation: bool,
        /// Skip the validation pass
        #[arg(long)]
        no_validation: bool,
        /// Write the assembled document as JSON to this path
        #[arg(long, short = 'o')]
        output: Option<String>,
    },

    /// Resume a failed, cancelled or interrupted task
    Resume {
        /// Task ID
        #[arg(long)]
        task_id: String,
        /// Write the assembled document as JSON to this path
        #[arg(long, short = 'o')]
        output: Option<String>,
    },

    /// Show a task record
    Status {
        /// Task ID
        #[arg(long)]
        task_id: String,
    },

    /// List tasks
    Tasks {
        /// Only tasks of this project
        #[arg(long)]
        project_id: Option<String>,
    },

    /// List the checkpoints of a task
    Checkpoints {
        /// Task ID
        #[arg(long)]
        task_id: String,
    },

    /// Parse an outline file and print the section tree
    Outline {
        /// Outline file
        #[arg(long)]
        file: String,
        /// Deepest level kept; deeper headings are clamped
        #[arg(long, default_value_t = 4)]
        max_depth: usize,
    },

    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "draftloom_core=info,draftloom_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Some(Commands::Run {
            document,
            outline,
            project_id,
            no_differentiation,
            no_validation,
            output,
        }) => match commands::init_context(&cli.db, cli.config.as_deref()) {
            Ok(ctx) => {
                let options = commands::run::RunOptions {
                    document,
                    outline,
                    project_id,
                    no_differentiation,
                    no_validation,
                    output,
                };
                commands::run::run(&ctx, &options).await
            }
            Err(e) => Err(e),
        },

        Some(Commands::Resume { task_id, output }) => {
            match commands::init_context(&cli.db, cli.config.as_deref()) {
                Ok(ctx) => commands::resume::run(&ctx, &task_id, output.as_deref()).await,
                Err(e) => Err(e),
            }
        }

        Some(Commands::Status { task_id }) => {
            match commands::init_context(&cli.db, cli.config.as_deref()) {
                Ok(ctx) => commands::status::status(&ctx, &task_id).await,
                Err(e) => Err(e),
            }
        }

        Some(Commands::Tasks { project_id }) => {
            match commands::init_context(&cli.db, cli.config.as_deref()) {
                Ok(ctx) => commands::status::tasks(&ctx, project_id.as_deref()).await,
                Err(e) => Err(e),
            }
        }

        Some(Commands::Checkpoints { task_id }) => {
            match commands::init_context(&cli.db, cli.config.as_deref()) {
                Ok(ctx) => commands::status::checkpoints(&ctx, &task_id).await,
                Err(e) => Err(e),
            }
        }

        Some(Commands::Outline { file, max_depth }) => commands::outline::run(&file, max_depth),

        Some(Commands::Config) => commands::config::show(cli.config.as_deref()),

        None => {
            // No subcommand: show help
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
