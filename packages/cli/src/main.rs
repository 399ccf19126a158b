//! `gweave`: graphweave command-line interface.
//!
//! Replays authoring scripts against a diagram and reports the resulting
//! pending changes and validation:
//!
//! - **`run`**: replay a script and print the authoring and validation state.
//! - **`check`**: replay a script and exit 1 if validation errors remain.
//!
//! Both subcommands read the script from a file path or from stdin (`-`).
//!
//! Exit codes: 0 on success, 1 when `check` finds validation errors, 2 when
//! the script cannot be read, parsed or replayed.

mod rules;
mod script;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use graphweave::render::{render_authoring_state, render_validation_state};
use graphweave::{EditorConfig, EditorController, EditorMode};
use tracing::info;

use rules::RuleValidator;
use script::{Script, ScriptError};

const EXIT_INVALID: i32 = 1;
const EXIT_SCRIPT_FAILED: i32 = 2;

/// gweave: graphweave authoring CLI
///
/// Replay editor steps against a diagram and inspect the pending changes.
#[derive(Parser)]
#[command(name = "gweave", version, about, long_about = None)]
struct Cli {
    /// Undo units kept in history.
    #[arg(long, env = "GWEAVE_HISTORY_DEPTH", default_value_t = 100, global = true)]
    history_depth: usize,

    /// Artificial validator latency in milliseconds.
    #[arg(long, env = "GWEAVE_VALIDATION_LATENCY_MS", default_value_t = 0, global = true)]
    latency_ms: u64,

    /// Do not validate.
    #[arg(long, global = true)]
    no_validate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a script and print the pending changes and validation results.
    ///
    /// Pass `-` as SCRIPT to read from stdin.
    Run {
        /// Path to a JSON script, or `-` for stdin.
        script: PathBuf,
    },

    /// Replay a script and exit 1 if any validation error remains.
    ///
    /// Pass `-` as SCRIPT to read from stdin.
    Check {
        /// Path to a JSON script, or `-` for stdin.
        script: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gweave=info,graphweave=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("gweave: {}", e);
            process::exit(EXIT_SCRIPT_FAILED);
        }
    }
}

async fn run(cli: Cli) -> Result<i32, ScriptError> {
    let (path, check) = match &cli.command {
        Command::Run { script } => (script.as_path(), false),
        Command::Check { script } => (script.as_path(), true),
    };
    let script = Script::from_json(&read_input(path)?)?;

    let config = EditorConfig {
        history_depth: cli.history_depth,
        ..EditorConfig::from_env()
    };
    let readonly = config.mode == EditorMode::Readonly;
    let editor = EditorController::with_diagram(config, script.diagram());
    if !cli.no_validate {
        let latency = Duration::from_millis(cli.latency_ms);
        editor.set_validator(Some(Arc::new(RuleValidator::new(latency))));
    }

    if readonly {
        info!(steps = script.steps.len(), "readonly mode: steps skipped");
    } else {
        info!(steps = script.steps.len(), "replaying script");
        script.replay(&editor)?;
    }
    editor.validation_settled().await;
    let validation = editor.validation_state();
    info!(errors = validation.error_count(), "validation settled");

    if check {
        if validation.error_count() > 0 {
            print!("{}", render_validation_state(&validation));
            return Ok(EXIT_INVALID);
        }
        println!("valid");
        return Ok(0);
    }

    print!("{}", render_authoring_state(&editor.authoring_state()));
    println!();
    print!("{}", render_validation_state(&validation));
    Ok(0)
}

/// Read the full contents of a file, or stdin when the path is `"-"`.
fn read_input(path: &Path) -> Result<String, ScriptError> {
    let io_err = |source| ScriptError::Io {
        path: path.display().to_string(),
        source,
    };
    if path.to_str() == Some("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).map_err(io_err)?;
        Ok(buf)
    } else {
        fs::read_to_string(path).map_err(io_err)
    }
}
