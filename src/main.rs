// ABOUTME: Main entry point for the promptq dispatch workers and terminal chat
// ABOUTME: Parses the command line, initializes logging, config and metrics, then runs a command

use anyhow::Result;
use clap::{Parser, Subcommand};
use promptq::{app, config::Config, logging, metrics};

/// Queue-based dispatch of chat prompts to AI workers
#[derive(Debug, Parser)]
#[command(name = "promptq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the common and private queues and answer questions
    Worker,
    /// Chat from the terminal; answers arrive asynchronously
    Chat {
        /// Also run a worker in this process
        #[arg(long)]
        embedded_worker: bool,
    },
    /// Print the worker id and private queue for the configured credential
    Identity,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n╔══════════════════════════════════════════════════════════╗");
        eprintln!("║ PANIC! promptq crashed with the following error:         ║");
        eprintln!("╚══════════════════════════════════════════════════════════╝\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    // Loaded before the subscriber exists since it names the log directory
    let config = Config::load()?;
    let _log_guard = logging::init(cli.log_json, config.logging.dir.as_deref())?;

    tracing::info!(
        store = %config.store.url,
        backend = %config.backend.backend_type,
        response_queue = %config.dispatch.response_queue,
        "Configuration loaded"
    );

    if let Some(listen) = &config.metrics.listen {
        metrics::init_prometheus(listen)?;
    }

    match cli.command {
        Command::Worker => app::run_worker(config).await,
        Command::Chat { embedded_worker } => app::run_chat(config, embedded_worker).await,
        Command::Identity => {
            let id = app::worker_identity(&config.backend);
            println!("worker id:     {}", id);
            println!("private queue: {}", promptq_core::queue::worker_queue(&id));
            Ok(())
        }
    }
}
