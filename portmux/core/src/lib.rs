//! Portmux Core - Worker/Runner Message-Port Multiplexing
//!
//! This crate is a small structured-concurrency transport: a host process
//! communicates with one or more worker processes over bidirectional
//! message channels, and a single worker may simultaneously serve many
//! independent logical connections ("ports"), each with its own
//! cancellation scope. The host side sees one uniform channel abstraction
//! whether the worker is dedicated or shared.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Host process ────────────────────────────┐
//! │   RPC / connection pool (external)                                   │
//! │        │                                                             │
//! │   HostFactory ── spawn(id) ──► WorkerHandle                          │
//! │        │                                                             │
//! │   HostChannel ◄── DATA payloads ── sink                              │
//! └────────┼─────────────────────────────────────────────────────────────┘
//!          │  frames: [0, payload, transfer?] | [1]
//! ┌────────┼──────────────────────────── Worker process ─────────────────┐
//! │   ConnectionAcceptor ──► WorkerRunner ──► PortRegistry               │
//! │                              │                │                      │
//! │                          handler ──► PortSession (scope + fibers)    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every inbound connection is registered as a [`PortSession`] with a scope
//! forked from the runner's root scope; DATA frames fork handler futures
//! under that scope, CLOSE frames tear down exactly that port, unless it
//! is the last one, in which case the whole runner shuts down.
//!
//! # Key Types
//!
//! - [`WorkerRunner`]: worker-side orchestrator; `run` suspends until the
//!   last port closes
//! - [`HostChannel`] / [`HostFactory`]: client-side adapter and factory
//! - [`Channel`] / [`Frame`]: the physical duplex and its wire format
//! - [`Scope`]: cancellation boundary; closing interrupts forked fibers
//! - [`PortRegistry`] / [`PortId`]: live-session table and identities
//!
//! # Quick Start
//!
//! ```ignore
//! use portmux_core::{
//!     channel_pair, ChannelKind, HostChannel, MuxConfig, RunnerMode,
//!     WorkerHandle, WorkerRunner,
//! };
//! use futures::FutureExt;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = MuxConfig::default();
//!     let (worker_half, host_half) = channel_pair(ChannelKind::Dedicated, &config);
//!
//!     // Worker side: echo each number back, incremented.
//!     let mut runner = WorkerRunner::<u64, u64>::start(RunnerMode::dedicated(worker_half));
//!     let handle = runner.handle();
//!     tokio::spawn(async move {
//!         runner
//!             .run(move |port, n: u64| {
//!                 let handle = handle.clone();
//!                 Some(async move { Ok(handle.send(port, &(n + 1)).await?) }.boxed())
//!             })
//!             .await
//!     });
//!
//!     // Host side: send 41, receive 42.
//!     let (sink_tx, mut sink_rx) = mpsc::channel(8);
//!     let host = HostChannel::<u64, u64>::open(
//!         WorkerHandle { id: 0, channel: host_half },
//!         Arc::new(sink_tx),
//!     )
//!     .unwrap();
//!     host.ready().await.unwrap();
//!     host.send(&41).await.unwrap();
//!     assert_eq!(sink_rx.recv().await, Some(42));
//!     host.close().await;
//! }
//! ```
//!
//! # What this layer does not do
//!
//! Payload interpretation and schema validation (the RPC layer above),
//! encryption, flow control beyond bounded post-and-forget buffers, and
//! worker process spawning all belong to external collaborators.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acceptor;
pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod host;
pub mod registry;
pub mod runner;
pub mod scope;
pub mod session;

// Re-exports for convenience
pub use acceptor::{AcceptorHandle, ConnectionAcceptor};
pub use channel::{channel_pair, Channel, ChannelKind};
pub use config::MuxConfig;
pub use error::TransportError;
pub use frame::{decode, encode, Frame, WireMessage, CLOSE_TAG, DATA_TAG};
pub use host::{HostChannel, HostFactory, PayloadSink, WorkerHandle};
pub use registry::{PortId, PortRegistry};
pub use runner::{RunnerHandle, RunnerMode, RunnerState, WorkerRunner};
pub use scope::Scope;
pub use session::{HandlerFuture, PortSession};
