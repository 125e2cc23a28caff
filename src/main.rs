//! Snowdrift CLI: run file-collection tasks against a YAML config.
//!
//! The binary wires the collection core to a minimal logging instance
//! manager so discovered files are visible on stdout; real deployments
//! embed the library and provide their own [`InstanceManager`].

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use snowdrift::{
    Config, FileCollectTask, InstanceAction, InstanceManager, SystemClock, TaskAction, TaskManager,
    shutdown_signal,
};

/// Snowdrift - file collection agent core
#[derive(Parser, Debug)]
#[command(name = "snowdrift")]
#[command(about = "Discovers date-partitioned log files and hands them off for ingestion")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "snowdrift.yaml")]
    config: String,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

/// Accepts every instance and logs it. Stands in for the real downstream.
#[derive(Default)]
struct LoggingInstanceManager {
    accepted: AtomicUsize,
}

impl InstanceManager for LoggingInstanceManager {
    fn start(&self) {}

    fn stop(&self) {
        info!(
            accepted = self.accepted.load(Ordering::SeqCst),
            "Instance manager stopped"
        );
    }

    fn submit_action(&self, action: InstanceAction) -> bool {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        info!(
            task_id = %action.profile.task_id,
            instance_id = %action.profile.instance_id,
            data_time = %action.profile.data_time,
            "Instance added"
        );
        true
    }

    fn should_add_again(&self, _file_path: &str, _mtime_ms: i64) -> bool {
        true
    }

    fn all_instance_finished(&self) -> bool {
        true
    }
}

/// Logs finish actions from retry tasks.
#[derive(Default)]
struct LoggingTaskManager;

impl TaskManager for LoggingTaskManager {
    fn submit_action(&self, action: TaskAction) -> bool {
        info!(task_id = %action.profile.task_id, kind = ?action.kind, "Task action received");
        true
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();
    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config {}: {e}", args.config);
            return ExitCode::FAILURE;
        }
    };
    let calc = match config.date_calc() {
        Ok(calc) => calc,
        Err(e) => {
            eprintln!("Invalid config: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(tasks = config.tasks.len(), zone = %config.time_zone, "Starting snowdrift");

    let clock = Arc::new(SystemClock);
    let task_manager = Arc::new(LoggingTaskManager);
    let mut handles = Vec::new();
    let mut joins = Vec::new();
    for (name, profile) in &config.tasks {
        info!(task = %name, task_id = %profile.task_id,
            patterns = %profile.file_dir_filter_patterns, "Starting task");
        let mut task = FileCollectTask::new(
            profile.clone(),
            calc,
            clock.clone(),
            task_manager.clone(),
            Arc::new(LoggingInstanceManager::default()),
        );
        task.init();
        handles.push(task.handle());
        joins.push(tokio::spawn(task.run()));
    }

    shutdown_signal().await;
    info!("Shutting down tasks");
    for handle in &handles {
        handle.destroy().await;
    }
    for join in joins {
        if let Err(e) = join.await {
            error!(error = %e, "Task loop join failed");
        }
    }
    info!("All tasks stopped");
    ExitCode::SUCCESS
}
