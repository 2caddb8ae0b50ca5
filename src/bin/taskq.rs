//! taskq CLI: run shell commands through concurrency-bounded queues.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use taskq::config::{Config, QueueDefinitions, QueueOptions};
use taskq::event::{Event, EventKind};
use taskq::model::NewTask;
use taskq::telemetry::{TelemetryConfig, init_telemetry};
use taskq::{DEFAULT_QUEUE, Registry};
use tokio::process::Command as ShellCommand;

#[derive(Parser)]
#[command(name = "taskq", about = "Concurrency-bounded task queues")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run shell commands as tasks and stream queue events
    Exec {
        /// TOML file with queue definitions
        #[arg(long)]
        queues: Option<PathBuf>,
        /// Queue to submit to
        #[arg(long, default_value = DEFAULT_QUEUE)]
        queue: String,
        /// Override the queue's concurrency
        #[arg(long)]
        concurrency: Option<usize>,
        /// Name each task after its command and skip pending duplicates
        #[arg(long)]
        unique: bool,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
        /// Commands to run (each through `sh -c`)
        #[arg(required = true)]
        commands: Vec<String>,
    },
    /// Validate a queue definitions file and list its queues
    Queues {
        /// TOML file with queue definitions
        #[arg(long)]
        queues: PathBuf,
    },
}

// The registry delivers events on this thread once each call returns.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Exec {
            queues,
            queue,
            concurrency,
            unique,
            json,
            commands,
        } => {
            let _guard = init_telemetry(TelemetryConfig {
                endpoint: config.otel_endpoint.clone(),
                service_name: "taskq".to_string(),
                default_filter: config.log_level.clone(),
            })?;
            cmd_exec(&config, queues, queue, concurrency, unique, json, commands).await
        }
        Command::Queues { queues } => cmd_queues(&config, queues),
    }
}

async fn cmd_exec(
    config: &Config,
    queues: Option<PathBuf>,
    queue: String,
    concurrency: Option<usize>,
    unique: bool,
    json: bool,
    commands: Vec<String>,
) -> anyhow::Result<()> {
    let registry = Registry::with_defaults(config.queue_defaults())?;
    if let Some(path) = queues {
        registry.create_all(&QueueDefinitions::load(&path)?);
    }
    let created = registry.create(&queue, QueueOptions { concurrency });
    if let (false, Some(n)) = (created, concurrency) {
        registry.set_concurrency(&queue, n);
    }

    let mut events = registry.subscribe();

    let mut accepted = 0usize;
    for command in commands {
        let mut task = NewTask::from_future(run_command(command.clone()))
            .meta(json!({ "command": command }));
        if unique {
            task = task.name(command).unique(true);
        }
        if registry.push(&queue, task)? {
            accepted += 1;
        }
    }

    let mut finished = 0usize;
    let mut failed = 0usize;
    while finished < accepted {
        let Some(event) = events.recv().await else {
            anyhow::bail!("event stream closed with {} task(s) outstanding", accepted - finished);
        };
        print_event(&event, json)?;

        if let EventKind::Done { ref args, .. } = event.kind {
            finished += 1;
            let success = args
                .first()
                .and_then(|v| v.get("success"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !success {
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {accepted} command(s) failed");
    }
    Ok(())
}

fn cmd_queues(config: &Config, path: PathBuf) -> anyhow::Result<()> {
    let defs = QueueDefinitions::load(&path)?;
    let resolved = defs.resolve(&config.queue_defaults());

    if resolved.is_empty() {
        println!("No queues defined.");
        return Ok(());
    }

    println!("{:<24}  CONCURRENCY", "QUEUE");
    println!("{}", "-".repeat(40));
    for (name, queue) in &resolved {
        println!("{:<24}  {}", name, queue.concurrency);
    }
    println!("\n{} queue(s)", resolved.len());
    Ok(())
}

/// Run one shell command; its exit status becomes the `done` argument.
async fn run_command(command: String) -> Vec<Value> {
    match ShellCommand::new("sh").arg("-c").arg(&command).status().await {
        Ok(status) => vec![json!({ "success": status.success(), "code": status.code() })],
        Err(e) => vec![json!({ "success": false, "error": e.to_string() })],
    }
}

fn print_event(event: &Event, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!(
            "{:>4}  {}  {}",
            event.seq,
            event.timestamp.format("%H:%M:%S%.3f"),
            event.kind
        );
    }
    Ok(())
}
