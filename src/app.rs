// ABOUTME: Process bootstrap for the worker and chat commands
// ABOUTME: Wires config, store, backend registry, worker loop, relay, and Ctrl-C shutdown

use crate::console::{ConsoleFrontend, ConsoleInput};
use anyhow::{Context, Result};
use promptq_agent::{BackendRegistry, SharedBackend};
use promptq_core::bindings::ThreadBindings;
use promptq_core::config::{BackendConfig, Config};
use promptq_core::store::{self, SharedStore};
use promptq_core::{Dispatcher, Queue, Relay, SubmitOutcome, Worker, WorkerId};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

/// Identity a worker with this backend config runs under.
///
/// Backends without a credential (mock) fall back to the backend type name.
pub fn worker_identity(backend: &BackendConfig) -> WorkerId {
    WorkerId::derive(backend.credential().unwrap_or(&backend.backend_type))
}

pub fn build_backend(registry: &BackendRegistry, config: &BackendConfig) -> Result<SharedBackend> {
    registry
        .create(&config.backend_type, &config.to_json_value())
        .with_context(|| format!("Failed to create '{}' backend", config.backend_type))
}

async fn connect_store(config: &Config) -> Result<SharedStore> {
    store::connect(&config.store.url)
        .await
        .with_context(|| format!("Failed to connect to store at {}", config.store.url))
}

fn build_worker(config: &Config, store: SharedStore) -> Result<Worker> {
    let backend = build_backend(&BackendRegistry::default(), &config.backend)?;
    Ok(Worker::new(
        worker_identity(&config.backend),
        Queue::new(store),
        backend,
        config.dispatch.worker_config(),
    ))
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("Shutdown requested");
        token.cancel();
    });
}

/// Run a worker until Ctrl-C. A failed initial backend session is returned as an error.
pub async fn run_worker(config: Config) -> Result<()> {
    let store = connect_store(&config).await?;
    let worker = build_worker(&config, Arc::clone(&store))?;
    tracing::info!(
        worker_id = %worker.id(),
        backend = %config.backend.backend_type,
        store = %config.store.url,
        "Starting worker"
    );
    worker.start().await?;

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    worker.run(shutdown).await;

    store.close().await;
    Ok(())
}

/// Interactive terminal chat. With `embedded_worker` a worker runs in the same process.
pub async fn run_chat(config: Config, embedded_worker: bool) -> Result<()> {
    let store = connect_store(&config).await?;
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let worker_task = if embedded_worker {
        let worker = build_worker(&config, Arc::clone(&store))?;
        worker.start().await?;
        tracing::info!(worker_id = %worker.id(), "Embedded worker started");
        let token = shutdown.clone();
        Some(tokio::spawn(async move { worker.run(token).await }))
    } else {
        if config.store.url.starts_with("memory://") {
            tracing::warn!("Memory store without --embedded-worker: nothing will answer");
        }
        None
    };

    let frontend = Arc::new(ConsoleFrontend::new(config.frontend.bot_user_id.clone()));
    let relay = Arc::new(Relay::new(
        Arc::clone(&frontend),
        Dispatcher::new(Queue::new(Arc::clone(&store)), config.dispatch.response_queue.clone()),
        ThreadBindings::new(Arc::clone(&store), config.frontend.binding_ttl()),
        config.frontend.reactions(),
        config.dispatch.poll_interval(),
    ));

    let listener = {
        let relay = Arc::clone(&relay);
        let token = shutdown.clone();
        tokio::spawn(async move { relay.listen_answers(token).await })
    };

    println!("Type a question. /new starts a new thread, /quit exits.");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };

        match frontend.read_line(&line) {
            ConsoleInput::Empty => {}
            ConsoleInput::Quit => break,
            ConsoleInput::NewThread => println!("-- new thread --"),
            ConsoleInput::Prompt(prompt) => match relay.on_message(prompt).await {
                Ok(SubmitOutcome::Enqueued { queue }) => {
                    tracing::debug!(queue = %queue, "Prompt queued");
                }
                Ok(SubmitOutcome::Dropped) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to submit prompt");
                    println!("Could not send: {:#}", e);
                }
            },
        }
    }

    shutdown.cancel();
    if let Err(e) = listener.await {
        tracing::warn!(error = %e, "Answer listener task failed");
    }
    if let Some(task) = worker_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Embedded worker task failed");
        }
    }
    store.close().await;
    Ok(())
}
