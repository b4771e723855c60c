//! # WFL Worker
//!
//! The Worker Protocol (spec §4.J, §6): a lightweight distributed-execution
//! mode where the Scheduler hands scheduled steps with `executor: worker` to
//! whichever remote process next asks for work over HTTP, instead of running
//! them in-process through a [`wfl_engine::runtime::RuntimeAdapter`].
//!
//! - [`client`] — the worker process's view: register, heartbeat, checkout,
//!   report status, complete, deregister.
//! - [`server`] — the scheduler-side route handlers those calls land on,
//!   backed by a [`wfl_engine::persistence::Store`].
//! - [`backoff`] — the retry policy [`client::WorkerClient`] uses for
//!   protocol-level failures.

pub mod backoff;
pub mod client;
pub mod server;

pub use backoff::Backoff;
pub use client::{TlsConfig, WorkerClient, WorkerClientConfig};
pub use server::{WorkerServerState, router, serve};
