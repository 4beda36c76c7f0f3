//! Portmux echo demo
//!
//! Wires a dedicated-worker runner and a host channel together in one
//! process and round-trips a few messages: the runner echoes every number
//! back incremented, and the host closes the connection when done, driving
//! the runner to a clean stop.
//!
//! Run with `RUST_LOG=debug` to watch the lifecycle transitions.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portmux_core::{
    channel_pair, ChannelKind, HostChannel, MuxConfig, RunnerMode, WorkerHandle, WorkerRunner,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = MuxConfig::from_env();
    let (worker_half, host_half) = channel_pair(ChannelKind::Dedicated, &config);

    // Worker side: a dedicated runner whose handler echoes n + 1.
    let mut runner = WorkerRunner::<u64, u64>::start(RunnerMode::dedicated(worker_half));
    let handle = runner.handle();
    let runner_task = tokio::spawn(async move {
        runner
            .run(move |port, n: u64| {
                let handle = handle.clone();
                Some(async move { Ok(handle.send(port, &(n + 1)).await?) }.boxed())
            })
            .await
    });

    // Host side: open the channel, wait for the ready handshake, exchange.
    let (sink_tx, mut sink_rx) = mpsc::channel(16);
    let host = HostChannel::<u64, u64>::open(
        WorkerHandle {
            id: 0,
            channel: host_half,
        },
        Arc::new(sink_tx),
    )?;
    host.ready().await?;

    for n in [1u64, 10, 41] {
        host.send(&n).await?;
        let echoed = sink_rx
            .recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("echo stream ended early"))?;
        info!(sent = n, received = echoed, "Echo round-trip");
    }

    host.close().await;
    runner_task.await??;
    info!("Runner stopped cleanly");

    Ok(())
}
