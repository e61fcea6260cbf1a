//! Cellpilot 命令行入口
//!
//! 用内存文档与空执行器跑一轮 Generate，Ctrl-C 取消，结束后打印文档中的块。

use std::sync::Arc;

use anyhow::Context;
use cellpilot::config::load_config;
use cellpilot::document::{DocumentStore, InMemoryDocument, NoopExecutor};
use cellpilot::turn::TurnEvent;
use cellpilot::{Agent, TurnMode};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let request = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    anyhow::ensure!(!request.trim().is_empty(), "usage: cellpilot <request>");

    let cfg = load_config(None).context("Failed to load config")?;
    let doc = InMemoryDocument::new();
    let store: Arc<dyn DocumentStore> = Arc::new(doc.clone());

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let agent = Agent::from_config(&cfg, store, Some(Arc::new(NoopExecutor))).with_events(event_tx);
    let agent = Arc::new(agent);

    let printer = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            if let TurnEvent::ActionSelected { action, .. } = &ev {
                println!(">> {action}");
            }
            tracing::debug!(event = ?ev, "turn event");
        }
    });

    let canceller = {
        let agent = agent.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                agent.cancel().await;
            }
        })
    };

    let report = agent
        .start_turn(&request, TurnMode::Generate, None)
        .await
        .context("Turn failed")?;
    canceller.abort();
    let _ = canceller.await;
    drop(agent);
    let _ = printer.await;

    println!("outcome: {:?} after {} iteration(s)", report.outcome, report.iterations);
    for (i, block) in doc.snapshot().await.iter().enumerate() {
        println!("--- [{i}] {} ({:?})", block.kind.as_str(), block.author);
        println!("{}", block.source);
    }
    Ok(())
}
