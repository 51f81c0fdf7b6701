use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

use super::buffer::{FlushPolicy, FlushTrigger, LogBatch};
use super::flatten::flatten;
use super::{BrokerConnector, Delivery, DeliveryStream};
use crate::broker::BrokerError;
use crate::metrics;
use crate::models::LogEntry;
use crate::signals::ShutdownSignal;
use crate::storage::PartitionedWriter;

/// Connection lifecycle, observable through [`LogShipper::state`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipperState {
    Disconnected,
    Connecting,
    Consuming,
}

/// Fixed back-off between connection attempts, retried forever
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

enum SessionEnd {
    Shutdown,
    Lost(BrokerError),
}

pub struct LogShipper {
    connector: Arc<dyn BrokerConnector>,
    writer: PartitionedWriter,
    policy: FlushPolicy,
    reconnect: ReconnectPolicy,
    state: watch::Sender<ShipperState>,
}

impl LogShipper {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        writer: PartitionedWriter,
        policy: FlushPolicy,
        reconnect: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ShipperState::Disconnected);
        Self {
            connector,
            writer,
            policy,
            reconnect,
            state,
        }
    }

    pub fn state(&self) -> ShipperState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ShipperState> {
        self.state.subscribe()
    }

    /// Consume until a shutdown signal arrives, reconnecting after every lost session
    pub async fn run(&self, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        loop {
            self.set_state(ShipperState::Connecting);
            let connected = tokio::select! {
                _ = shutdown.recv() => break,
                result = self.connector.connect(self.policy.prefetch()) => result,
            };

            match connected {
                Ok(mut stream) => {
                    self.set_state(ShipperState::Consuming);
                    tracing::info!(prefetch = self.policy.prefetch(), "Consuming audit queue");
                    let end = self.consume(stream.as_mut(), &mut shutdown).await;
                    stream.close().await;
                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(e) => {
                            tracing::warn!(error = %e, "Broker session lost");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to connect to broker");
                }
            }

            self.set_state(ShipperState::Disconnected);
            tracing::info!(delay_ms = self.reconnect.delay.as_millis(), "Reconnecting after delay");
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.reconnect.delay) => {}
            }
        }

        self.set_state(ShipperState::Disconnected);
        tracing::info!("Log shipper stopped");
    }

    async fn consume(
        &self,
        stream: &mut dyn DeliveryStream,
        shutdown: &mut broadcast::Receiver<ShutdownSignal>,
    ) -> SessionEnd {
        let mut batch = LogBatch::new();
        let mut tick = tokio::time::interval(self.policy.tick_period());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    if !batch.is_empty() {
                        if let Err(e) = self.flush(&mut batch, FlushTrigger::Shutdown).await {
                            tracing::warn!(error = %e, "Failed to settle messages during shutdown");
                        }
                    }
                    return SessionEnd::Shutdown;
                }
                delivery = stream.next_delivery() => {
                    let result = match delivery {
                        Some(Ok(delivery)) => self.receive(&mut batch, delivery).await,
                        Some(Err(e)) => Err(e),
                        None => Err(BrokerError::StreamClosed),
                    };
                    if let Err(e) = result {
                        if !batch.is_empty() {
                            tracing::warn!(
                                messages = batch.len(),
                                "Dropping unacknowledged messages; the broker will redeliver them"
                            );
                        }
                        return SessionEnd::Lost(e);
                    }
                }
                _ = tick.tick() => {}
            }

            if let Some(trigger) = self.policy.should_flush(batch.len(), batch.since_flush()) {
                if let Err(e) = self.flush(&mut batch, trigger).await {
                    return SessionEnd::Lost(e);
                }
            }
        }
    }

    /// Buffer a message, or reject it at once when its body is not a log batch
    async fn receive(&self, batch: &mut LogBatch, delivery: Delivery) -> Result<(), BrokerError> {
        match LogEntry::decode_batch(&delivery.body) {
            Ok(entries) => {
                batch.push(entries, delivery.handle);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, bytes = delivery.body.len(), "Rejecting unparseable message");
                delivery.handle.reject().await
            }
        }
    }

    /// Write the batch and settle every message in it.
    ///
    /// Success acks, a storage failure rejects without requeue. The buffer is cleared
    /// either way; an error here means the broker session is unusable.
    async fn flush(&self, batch: &mut LogBatch, trigger: FlushTrigger) -> Result<(), BrokerError> {
        let rows = flatten(batch.messages());
        let messages = batch.len();

        let written = if rows.is_empty() {
            Ok(None)
        } else {
            self.writer.write(&rows).await.map(Some)
        };

        match written {
            Ok(key) => {
                for handle in batch.handles() {
                    handle.ack().await?;
                }
                metrics::record_flush("success", trigger.as_str(), rows.len());
                tracing::info!(
                    trigger = trigger.as_str(),
                    messages,
                    rows = rows.len(),
                    key = key.as_deref().unwrap_or("-"),
                    "Flushed audit batch"
                );
            }
            Err(e) => {
                metrics::record_flush("failure", trigger.as_str(), rows.len());
                tracing::error!(
                    trigger = trigger.as_str(),
                    messages,
                    rows = rows.len(),
                    error = %e,
                    "Failed to write audit batch, rejecting its messages"
                );
                for handle in batch.handles() {
                    handle.reject().await?;
                }
            }
        }

        batch.clear();
        Ok(())
    }

    fn set_state(&self, state: ShipperState) {
        self.state.send_replace(state);
    }
}
