/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use clap::{Parser, Subcommand};
use comfy_table::Table;
use dotenvy::dotenv;
use figlet_rs::FIGfont;
use mimalloc::MiMalloc;
use sinker::auth;
use sinker::config_loader::load_config;
use sinker::configs::SinkerConfig;
use sinker::error::RuntimeError;
use sinker::manager::{TaskManager, TaskStatus};
use sinker::metrics::Metrics;
use sinker::resolver::resolve_all;
use sinker::source::StdinSourceFactory;
use sinker::writer::StdoutWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "sinker", version, about)]
struct Cli {
    /// Configuration file (JSON, YAML or TOML)
    #[arg(short, long, env = "SINKER_CONFIG_PATH", default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve every task and print the effective settings
    Check,
    /// Run the configured tasks, reading records from stdin and writing batches to stdout
    Run {
        /// Run only the named task
        #[arg(short, long)]
        task: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), RuntimeError> {
    let cli = Cli::parse();

    if let Ok(font) = FIGfont::standard() {
        if let Some(figure) = font.convert("Sinker") {
            eprintln!("{figure}");
        }
    }

    if let Ok(env_path) = std::env::var("SINKER_ENV_PATH") {
        if dotenvy::from_path(&env_path).is_ok() {
            eprintln!("Loaded environment variables from path: {env_path}");
        }
    } else if let Ok(path) = dotenv() {
        eprintln!(
            "Loaded environment variables from .env file at path: {}",
            path.display()
        );
    }

    eprintln!("Loading configuration from: {}", cli.config.display());
    let config = load_config(&cli.config)?;

    let level = match config.common.log_level.as_str() {
        "" => "info",
        level => level,
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Command::Run { task: None }) {
        Command::Check => check(&config),
        Command::Run { task } => run(&cli.config, config, task).await,
    }
}

fn check(config: &SinkerConfig) -> Result<(), RuntimeError> {
    let resolved = resolve_all(config);
    for error in &resolved.cluster_errors {
        warn!("{error}");
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Task",
        "Cluster",
        "Topic",
        "Table",
        "Policy",
        "Shards",
        "Buffer",
        "Flush interval",
        "Credentials",
    ]);

    let mut invalid = resolved.rejected.len();
    for task in &resolved.tasks {
        let credentials = match auth::build(&task.cluster) {
            Ok(credentials) => credentials.to_string(),
            Err(error) => {
                invalid += 1;
                format!("invalid: {error}")
            }
        };
        table.add_row(vec![
            task.name.clone(),
            task.cluster.name.clone(),
            task.topic.clone(),
            task.table_name.clone(),
            task.sharding_policy.to_string(),
            task.shard_count().to_string(),
            format!("{}/{}", task.min_buffer_size, task.buffer_size),
            humantime::format_duration(task.flush_interval).to_string(),
            credentials,
        ]);
    }
    for (name, error) in &resolved.rejected {
        table.add_row(vec![
            name.clone(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            format!("invalid: {error}"),
        ]);
    }
    println!("{table}");

    if invalid > 0 {
        return Err(RuntimeError::InvalidTasks(invalid));
    }
    info!("All {} task(s) are valid", resolved.tasks.len());
    Ok(())
}

fn select_tasks(
    mut config: SinkerConfig,
    only: Option<&str>,
) -> Result<SinkerConfig, RuntimeError> {
    if let Some(name) = only {
        config.tasks.retain(|task| task.name == name);
        if config.tasks.is_empty() {
            return Err(RuntimeError::TaskNotFound(name.to_owned()));
        }
    }
    Ok(config)
}

async fn run(
    config_path: &Path,
    config: SinkerConfig,
    only: Option<String>,
) -> Result<(), RuntimeError> {
    let config = select_tasks(config, only.as_deref())?;
    let metrics = Arc::new(Metrics::init());
    let sources = Arc::new(StdinSourceFactory::new());
    let manager = TaskManager::new(
        sources.clone(),
        Arc::new(StdoutWriter::default()),
        metrics.clone(),
    );

    let report = manager.reload(&config).await;
    if manager.running().await == 0 {
        if report.rejected.is_empty() {
            warn!("No tasks configured, nothing to run");
            return Ok(());
        }
        return Err(RuntimeError::InvalidTasks(report.rejected.len()));
    }
    sources.start(BufReader::new(tokio::io::stdin()));
    info!("Feeding stdin to {} task(s)", sources.subscribers());

    wait_for_signals(config_path, only.as_deref(), &manager).await?;

    manager.stop_all().await;
    debug!("Final metrics:\n{}", metrics.render());

    let failed: Vec<_> = manager
        .get_all()
        .await
        .into_iter()
        .filter(|info| info.status == TaskStatus::Error)
        .collect();
    for info in &failed {
        error!(
            "Task '{}' ended with an error: {}",
            info.name,
            info.last_error.as_deref().unwrap_or("unknown")
        );
    }
    if !failed.is_empty() {
        return Err(RuntimeError::TasksFailed(failed.len()));
    }
    info!("Sinker stopped successfully");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signals(
    config_path: &Path,
    only: Option<&str>,
    manager: &TaskManager,
) -> Result<(), RuntimeError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut ctrl_c = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = ctrl_c.recv() => {
                info!("Received SIGINT. Shutting down sinker...");
                return Ok(());
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM. Shutting down sinker...");
                return Ok(());
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP. Reloading configuration...");
                match load_config(config_path).map_err(RuntimeError::from).and_then(|config| select_tasks(config, only)) {
                    Ok(config) => {
                        manager.reload(&config).await;
                    }
                    Err(error) => error!("Keeping the current configuration, reload failed: {error}"),
                }
            }
            _ = manager.task_finished() => {
                if manager.running().await == 0 {
                    info!("All tasks finished");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(
    _config_path: &Path,
    _only: Option<&str>,
    manager: &TaskManager,
) -> Result<(), RuntimeError> {
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C. Shutting down sinker...");
                return Ok(());
            }
            _ = manager.task_finished() => {
                if manager.running().await == 0 {
                    info!("All tasks finished");
                    return Ok(());
                }
            }
        }
    }
}
