//! Althea calculation engine - command line entry point
//!
//! `run` loads a workspace and recalculates it, `worker` is the child side
//! of process workers, `demo` builds a small sheet and prints its result.

use althea_engine::backend::run_worker_process;
use althea_engine::config::{AppConfig, ScriptConfig, WorkerMode};
use althea_engine::id::{NodeId, PinId, SheetId};
use althea_engine::sheet::SheetError;
use althea_engine::types::{NodeKind, PinDirection, SheetVariant, Value};
use althea_engine::{App, Sheet};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "althea-engine")]
#[command(about = "Node-graph calculation engine")]
struct Cli {
    /// Config file (TOML or JSON); defaults to the per-user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write daily rolling log files to this folder
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a workspace, recalculate it and print every View node
    Run {
        /// Workspace document
        workspace: PathBuf,
        /// Only recalculate this sheet
        #[arg(long)]
        sheet: Option<u64>,
        /// Override the configured number of workers
        #[arg(long)]
        workers: Option<usize>,
        /// Run workers as child processes
        #[arg(long)]
        process: bool,
    },
    /// Serve calculation jobs over stdin/stdout
    Worker {
        #[arg(long)]
        name: String,
        /// Script sandbox settings as JSON
        #[arg(long)]
        settings: Option<String>,
    },
    /// Build A -> Add -> View and print the result
    Demo,
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,althea_engine=debug"));
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "althea.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path).with_context(|| format!("Failed to load {:?}", path)),
        None => Ok(AppConfig::default_path()
            .map(AppConfig::load_or_default)
            .unwrap_or_default()),
    }
}

fn print_sheet(sheet: &Sheet) {
    println!(
        "{} \"{}\" ({}): {} {}",
        sheet.variant,
        sheet.name(),
        sheet.id,
        sheet.status(),
        sheet.message()
    );
    for node in sheet.nodes().iter().filter(|node| node.kind() == NodeKind::Display) {
        if let Some(pin) = node.inputs.first() {
            println!("  {} [{}] = {}", node.name(), node.id, pin.value);
        }
    }
}

fn pin_id(sheet: &Sheet, node: NodeId, direction: PinDirection, idx: usize) -> Result<PinId, SheetError> {
    let node = sheet.find_node(node).ok_or(SheetError::NodeNotFound(node))?;
    node.pins(direction)
        .get(idx)
        .map(|pin| pin.id)
        .ok_or(SheetError::PinNotFound(PinId::INVALID))
}

fn run(
    config: AppConfig,
    workspace: &Path,
    sheet: Option<u64>,
    workers: Option<usize>,
    process: bool,
) -> anyhow::Result<()> {
    let config = AppConfig {
        num_workers: workers.unwrap_or(config.num_workers),
        worker_mode: if process { WorkerMode::Process } else { config.worker_mode },
        ..config
    };
    let mut app = App::start(config)?;
    app.open_workspace(workspace)?;

    let mut failed = false;
    match sheet {
        Some(id) => {
            let report = app.recalc_sheet(SheetId(id))?;
            failed |= !report.is_success();
        }
        None => {
            for (_, report) in app.recalc_all() {
                failed |= !report.is_success();
            }
        }
    }

    for variant in [SheetVariant::Sheet, SheetVariant::Function] {
        for sheet in app.workspace().sheets_of(variant) {
            print_sheet(sheet);
        }
    }
    app.shutdown();
    if failed {
        bail!("{}", app.status());
    }
    Ok(())
}

fn demo(config: AppConfig) -> anyhow::Result<()> {
    let config = AppConfig {
        num_workers: 1,
        ..config
    };
    let mut app = App::start(config)?;
    let sheet_id = app.workspace().sheets()[0].id;
    app.edit_sheet(sheet_id, |sheet, ids| -> Result<(), SheetError> {
        let a = sheet.new_node("ValueNumber", ids)?;
        sheet.set_node_config(a, "value", 5i64)?;
        let add = sheet.new_node("MathAdd", ids)?;
        let view = sheet.new_node("View", ids)?;

        let a_out = pin_id(sheet, a, PinDirection::Output, 0)?;
        let add_a = pin_id(sheet, add, PinDirection::Input, 0)?;
        let add_b = pin_id(sheet, add, PinDirection::Input, 1)?;
        let add_out = pin_id(sheet, add, PinDirection::Output, 0)?;
        let view_in = pin_id(sheet, view, PinDirection::Input, 0)?;
        sheet.attempt_link(a_out, add_a, ids)?;
        sheet.set_input_value(add_b, Value::Int(3))?;
        sheet.attempt_link(add_out, view_in, ids)?;
        Ok(())
    })
    .context("Demo sheet is missing")??;

    let report = app.recalc_sheet(sheet_id)?;
    if let Some(sheet) = app.workspace().find_sheet(sheet_id) {
        print_sheet(sheet);
    }
    println!("Generations: {:?}", report.generations);
    app.shutdown();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_dir.as_deref());

    match cli.command {
        Commands::Worker { name, settings } => {
            let settings: ScriptConfig = match settings {
                Some(json) => serde_json::from_str(&json).context("Invalid --settings")?,
                None => ScriptConfig::default(),
            };
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            run_worker_process(&name, &settings, stdin.lock(), stdout.lock())?;
        }
        Commands::Run {
            workspace,
            sheet,
            workers,
            process,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run(config, &workspace, sheet, workers, process)?;
        }
        Commands::Demo => {
            let config = load_config(cli.config.as_deref())?;
            demo(config)?;
        }
    }
    Ok(())
}
