//! Tasker agent binary entry point.
//!
//! Loads TOML configuration, builds the dispatcher and the peer relay,
//! consumes lifecycle notifications and shuts down on ctrl-c or when a
//! task requests exit.

use anyhow::Result;
use clap::Parser;
use protocol::Task;
use std::{path::PathBuf, sync::Arc};
use tasker_agent::{
    AgentConfig, AppContext, DefaultHook, Dispatcher, NoExecution, NoShell, Notification,
    PluginRegistry, RelayServer, Unsupported,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    signal,
    sync::mpsc,
};
use tracing_subscriber::EnvFilter;

/// Tasker agent daemon.
#[derive(Parser, Debug)]
#[command(name = "taskerd", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read tasks as JSON lines from stdin and print results to stdout.
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing from RUST_LOG (default: info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            let config = AgentConfig::load(path)?;
            tracing::info!("loaded configuration from {}", path.display());
            config
        }
        None => AgentConfig::default(),
    };

    let (ctx, notifications) = AppContext::new(config);
    let dispatcher = Arc::new(Dispatcher::<DefaultHook>::new(
        &ctx,
        PluginRegistry::new(Unsupported),
        NoExecution,
        NoShell,
    ));

    let relay = if ctx.config.relay.enabled {
        let relay = Arc::new(RelayServer::new(&ctx));
        let handle = Arc::clone(&relay).start();
        Some((relay, handle))
    } else {
        tracing::info!("peer relay disabled");
        None
    };

    tokio::spawn(consume_notifications(ctx.clone(), notifications));
    if args.stdio {
        tokio::spawn(serve_stdio(ctx.clone(), dispatcher));
    }

    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            tracing::info!("received shutdown signal");
        }
        _ = ctx.shutdown.cancelled() => {}
    }
    ctx.shutdown.cancel();

    if let Some((relay, handle)) = relay {
        relay.stop();
        if let Err(e) = handle.await {
            tracing::warn!("relay task failed: {e}");
        }
    }

    tracing::info!("agent shut down");
    Ok(())
}

/// Act on lifecycle notifications that have no in-process manager.
async fn consume_notifications(ctx: AppContext, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        match notification {
            Notification::ExitRequested(job) => {
                tracing::info!("exit requested by task {}", job.id());
                ctx.shutdown.cancel();
            }
            other => tracing::info!(
                "{} requested by task {} with parameters {:?}",
                other.kind(),
                other.job().id(),
                other.job().task.parameters
            ),
        }
    }
}

/// Local task loop: one task per input line, results flushed after each.
async fn serve_stdio(ctx: AppContext, dispatcher: Arc<Dispatcher<DefaultHook>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = ctx.shutdown.cancelled() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("failed to read stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Task>(&line) {
            Ok(task) => dispatcher.submit(task).await,
            Err(e) => {
                tracing::warn!("ignoring malformed task: {e}");
                continue;
            }
        }

        for response in dispatcher.collect_results().await {
            let Ok(mut out) = serde_json::to_vec(&response) else {
                continue;
            };
            out.push(b'\n');
            if let Err(e) = stdout.write_all(&out).await {
                tracing::warn!("failed to write result: {e}");
                return;
            }
        }
        let _ = stdout.flush().await;
    }
}
