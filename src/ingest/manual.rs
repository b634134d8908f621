//! Manual event injector — test and operator hook.
//!
//! Events injected through the handle flow inline into the source's
//! stream. Dropping every handle closes the channel, which ends the
//! consumer loop cleanly.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::error::IngestError;
use crate::events::{EventKind, MarketEvent};
use crate::ingest::{is_shutdown, IngestSource};

#[derive(Clone)]
pub struct InjectorHandle {
    tx: mpsc::UnboundedSender<MarketEvent>,
    default_source: String,
}

impl InjectorHandle {
    /// Inject an external event. Returns false once the injector stopped.
    pub fn inject(&self, content: impl Into<String>, source: Option<&str>, kind: EventKind) -> bool {
        let content = content.into();
        let source = source.unwrap_or(&self.default_source);
        let event = match kind {
            EventKind::Social => MarketEvent::social(content.clone(), source),
            _ => MarketEvent::news(content.clone(), source),
        };
        let preview: String = content.chars().take(50).collect();
        info!("💉 Injected {kind:?} event from {source}: {preview}");
        self.tx.send(event).is_ok()
    }
}

pub struct ManualInjector {
    rx: mpsc::UnboundedReceiver<MarketEvent>,
    handle: InjectorHandle,
    connected: bool,
}

impl ManualInjector {
    pub fn new(default_source: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            handle: InjectorHandle {
                tx,
                default_source: default_source.into(),
            },
            connected: false,
        }
    }

    pub fn handle(&self) -> InjectorHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl IngestSource for ManualInjector {
    fn name(&self) -> &'static str {
        "manual"
    }

    async fn connect(&mut self) -> Result<(), IngestError> {
        self.connected = true;
        info!("💉 Manual injector connected");
        Ok(())
    }

    async fn run(
        &mut self,
        out: mpsc::Sender<MarketEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), IngestError> {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || is_shutdown(&shutdown) {
                        break;
                    }
                }
                event = self.rx.recv() => {
                    match event {
                        Some(ev) => {
                            if out.send(ev).await.is_err() {
                                break;
                            }
                        }
                        // Every handle dropped: end of stream.
                        None => break,
                    }
                }
            }
        }
        self.disconnect().await;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        info!("💉 Manual injector disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_injected_events_flow_to_queue() {
        let mut injector = ManualInjector::new("manual");
        let handle = injector.handle();
        injector.connect().await.unwrap();

        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (_sd_tx, sd_rx) = watch::channel(false);
        let task = tokio::spawn(async move { injector.run(out_tx, sd_rx).await });

        assert!(handle.inject("Breaking: FED HIKE", None, EventKind::News));
        assert!(handle.inject("hot take", Some("x-feed"), EventKind::Social));

        let first = tokio::time::timeout(Duration::from_millis(200), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.kind, EventKind::News);
        assert_eq!(first.source.as_deref(), Some("manual"));

        let second = tokio::time::timeout(Duration::from_millis(200), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.kind, EventKind::Social);
        assert_eq!(second.source.as_deref(), Some("x-feed"));

        // Dropping the last handle terminates the stream cleanly.
        drop(handle);
        let result = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap();
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_token_stops_run() {
        let mut injector = ManualInjector::new("manual");
        let _handle = injector.handle();
        injector.connect().await.unwrap();

        let (out_tx, _out_rx) = mpsc::channel(16);
        let (sd_tx, sd_rx) = watch::channel(false);
        let task = tokio::spawn(async move { injector.run(out_tx, sd_rx).await });

        sd_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap();
        assert!(result.unwrap().is_ok());
    }
}
