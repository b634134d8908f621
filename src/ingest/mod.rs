//! Ingest sources — independent producers feeding the shared event queue.
//!
//! Each source is a task: the orchestrator calls `connect`, then spawns
//! `run`, which pushes `MarketEvent`s into the bounded queue until the
//! shutdown token flips or the source fails terminally. `run` owns its
//! cleanup: it disconnects before returning, so producers shut down
//! without the orchestrator reaching back into them.

pub mod clob_ws;
pub mod manual;
pub mod rss;

pub use clob_ws::{ClobMarketStream, SubscriptionHandle};
pub use manual::{InjectorHandle, ManualInjector};
pub use rss::RssPoller;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::IngestError;
use crate::events::MarketEvent;

#[async_trait]
pub trait IngestSource: Send + 'static {
    fn name(&self) -> &'static str;

    /// Establish the connection (transport handshake, initial
    /// subscription flush). Precedes `run`.
    async fn connect(&mut self) -> Result<(), IngestError>;

    /// Produce events into `out` until `shutdown` flips or the source
    /// fails terminally. Implementations disconnect before returning.
    async fn run(
        &mut self,
        out: mpsc::Sender<MarketEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), IngestError>;

    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// True once the shutdown token has flipped.
pub(crate) fn is_shutdown(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}
