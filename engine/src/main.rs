mod status_source;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use conclave_cluster::{ClusterRegistry, ClusterStorage, ExportFormat};
use conclave_runner::ProcessTaskRunner;
use conclave_types::{ClusterConfig, ClusterState, InputSource, Settings};
use status_source::CliStatusSource;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "conclave")]
#[command(about = "Headless multi-agent cluster orchestration engine")]
struct Cli {
    /// Directory holding cluster records and ledger dumps.
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Path to the externally-owned settings.json. Missing file falls back to defaults.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Non-blocking JSON log file; console-only when omitted.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Provider CLI program invoked as `<provider> run` / `<provider> status`.
    #[arg(long, global = true, default_value = "claude")]
    provider: String,

    #[arg(long, global = true, default_value_t = 4)]
    max_parallel: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validates and starts a new cluster from a config file.
    Start {
        config: PathBuf,
        #[arg(long)]
        input_text: Option<String>,
        #[arg(long)]
        input_file: Option<PathBuf>,
    },
    Stop { cluster_id: String },
    Kill { cluster_id: String },
    KillAll,
    Resume { cluster_id: String },
    List,
    Status { cluster_id: String },
    Export {
        cluster_id: String,
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormatArg,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ExportFormatArg {
    Json,
    Markdown,
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(value: ExportFormatArg) -> Self {
        match value {
            ExportFormatArg::Json => ExportFormat::Json,
            ExportFormatArg::Markdown => ExportFormat::Markdown,
        }
    }
}

type EngineRegistry = ClusterRegistry<ProcessTaskRunner<CliStatusSource>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let logs_dir = cli.log_file.as_deref().and_then(Path::parent);
    let _guard = conclave_observability::init_logging(logs_dir, 14).ok();

    let code = run(cli).await;
    drop(_guard);
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let storage_dir = resolve_storage_dir(cli.storage_dir);
    let settings = load_settings(cli.settings.as_deref());

    let storage = match ClusterStorage::open(storage_dir).await {
        Ok(storage) => Arc::new(storage),
        Err(error) => {
            eprintln!("failed to open cluster storage: {error}");
            return 2;
        }
    };

    let status_source = Arc::new(CliStatusSource::new(cli.provider.clone()));
    let runner = Arc::new(ProcessTaskRunner::new(cli.provider, Vec::new(), status_source));
    let registry: EngineRegistry = ClusterRegistry::new(storage, runner, settings, cli.max_parallel);

    let result = dispatch(&registry, cli.command).await;
    registry.close();
    result
}

async fn dispatch(registry: &EngineRegistry, command: Command) -> i32 {
    match command {
        Command::Start { config, input_text, input_file } => {
            let raw = match std::fs::read_to_string(&config) {
                Ok(raw) => raw,
                Err(error) => {
                    eprintln!("could not read {}: {error}", config.display());
                    return 1;
                }
            };
            let raw_value: serde_json::Value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(error) => {
                    eprintln!("invalid JSON in {}: {error}", config.display());
                    return 1;
                }
            };
            let parsed: ClusterConfig = match serde_json::from_value(raw_value.clone()) {
                Ok(config) => config,
                Err(error) => {
                    eprintln!("cluster config does not match the expected shape: {error}");
                    return 1;
                }
            };

            let input = build_input(input_text, input_file);
            let now_ms = chrono::Utc::now().timestamp_millis();
            match registry.start(&raw_value, parsed, input, now_ms).await {
                Ok(id) => {
                    println!("{id}");
                    await_completion(registry, &id).await
                }
                Err(report) => {
                    for issue in &report.errors {
                        eprintln!("error[{:?}] {}: {}", issue.category, issue.path, issue.message);
                    }
                    1
                }
            }
        }
        Command::Stop { cluster_id } => result_code(registry.stop(&cluster_id).await),
        Command::Kill { cluster_id } => result_code(registry.kill(&cluster_id).await),
        Command::KillAll => result_code(registry.kill_all().await),
        Command::Resume { cluster_id } => result_code(registry.resume(&cluster_id).await),
        Command::List => {
            for (id, state) in registry.list_clusters().await {
                println!("{id}\t{state:?}");
            }
            0
        }
        Command::Status { cluster_id } => match registry.get_status(&cluster_id).await {
            Some(state) => {
                println!("{state:?}");
                0
            }
            None => {
                eprintln!("no such cluster {cluster_id}");
                1
            }
        },
        Command::Export { cluster_id, format } => match registry.export(&cluster_id, format.into()).await {
            Ok(rendered) => {
                println!("{rendered}");
                0
            }
            Err(error) => {
                eprintln!("export failed: {error}");
                2
            }
        },
    }
}

/// Keeps the process alive for as long as the cluster's triggers keep firing, since the Bus's
/// subscriptions only exist in-process. Ctrl-C requests a graceful stop and exits 130.
async fn await_completion(registry: &EngineRegistry, cluster_id: &str) -> i32 {
    let mut poll = tokio::time::interval(std::time::Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = poll.tick() => {
                match registry.get_status(cluster_id).await {
                    Some(ClusterState::Stopped) => return 0,
                    Some(ClusterState::Failed) => return 2,
                    _ => continue,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = registry.stop(cluster_id).await;
                return 130;
            }
        }
    }
}

fn result_code(result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(error) => {
            eprintln!("{error}");
            2
        }
    }
}

fn build_input(text: Option<String>, file: Option<PathBuf>) -> InputSource {
    let resolved_text = match file {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(error) => {
                warn!("could not read input file {}: {error}", path.display());
                text
            }
        },
        None => text,
    };
    InputSource { text: resolved_text, file: None, issue: None }
}

fn resolve_storage_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    if let Ok(dir) = std::env::var("CONCLAVE_STORAGE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("conclave")
}

fn load_settings(path: Option<&Path>) -> Settings {
    let Some(path) = path else { return Settings::default() };
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|error| {
            warn!("settings file {} failed to parse ({error}); using defaults", path.display());
            Settings::default()
        }),
        Err(error) => {
            warn!("settings file {} not found ({error}); using defaults", path.display());
            Settings::default()
        }
    }
}
