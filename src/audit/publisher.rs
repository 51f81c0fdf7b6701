use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    BasicProperties, Channel, Connection,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::broker::{self, BrokerError, PERSISTENT_DELIVERY};
use crate::config::BrokerConfig;
use crate::models::LogEntry;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("publish not confirmed within {0:?}")]
    Timeout(Duration),
    #[error("broker refused the message")]
    Rejected,
    #[error("broker error: {0}")]
    Broker(String),
    #[error("failed to serialize log entries: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PublishError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Rejected => "rejected",
            Self::Broker(_) => "broker",
            Self::Serialize(_) => "serialize",
        }
    }
}

/// Durable-queue producer for audit entries.
///
/// One call publishes one message holding every entry passed in.
#[async_trait]
pub trait LogPublisher: Send + Sync + 'static {
    async fn publish(&self, entries: &[LogEntry]) -> Result<(), PublishError>;

    /// Close the underlying connection. Default: nothing to close.
    async fn close(&self) {}
}

/// One open producer connection to the broker
#[async_trait]
pub trait PublishSession: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    /// Publish one encoded message and wait for the broker's confirmation
    async fn publish(&self, body: &[u8]) -> Result<(), PublishError>;

    async fn close(&self);
}

/// Opens producer sessions; called at startup and after every connection loss
#[async_trait]
pub trait PublisherConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn PublishSession>, BrokerError>;
}

/// [`LogPublisher`] that survives broker restarts.
///
/// While the session is down every publish fails fast with
/// [`PublishError::Unavailable`] and a single background task reconnects with a
/// fixed delay. The first successful connect replaces the dead session.
pub struct ReconnectingPublisher {
    shared: Arc<Shared>,
}

struct Shared {
    connector: Arc<dyn PublisherConnector>,
    session: RwLock<Option<Arc<dyn PublishSession>>>,
    reconnect_delay: Duration,
    reconnecting: AtomicBool,
    closed: AtomicBool,
}

impl ReconnectingPublisher {
    /// Open the first session, retrying up to `attempts` times.
    ///
    /// The gateway refuses to start without a broker, so this is fallible; later
    /// reconnects are unbounded.
    pub async fn start(
        connector: Arc<dyn PublisherConnector>,
        attempts: u32,
        reconnect_delay: Duration,
    ) -> Result<Self, BrokerError> {
        let session = broker::with_retry(attempts, reconnect_delay, || connector.connect()).await?;

        Ok(Self {
            shared: Arc::new(Shared {
                connector,
                session: RwLock::new(Some(Arc::from(session))),
                reconnect_delay,
                reconnecting: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn schedule_reconnect(&self) {
        if self.shared.closed.load(Ordering::SeqCst)
            || self.shared.reconnecting.swap(true, Ordering::SeqCst)
        {
            return;
        }

        tracing::warn!(
            delay_ms = self.shared.reconnect_delay.as_millis(),
            "Audit publisher lost its broker connection, reconnecting"
        );
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.reconnect().await;
            shared.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

impl Shared {
    async fn reconnect(&self) {
        let mut attempt = 0u32;
        loop {
            tokio::time::sleep(self.reconnect_delay).await;
            if self.closed.load(Ordering::SeqCst) {
                return;
            }

            attempt += 1;
            let session: Arc<dyn PublishSession> = match self.connector.connect().await {
                Ok(session) => Arc::from(session),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Audit publisher reconnect failed");
                    continue;
                }
            };

            let mut slot = self.session.write().await;
            if self.closed.load(Ordering::SeqCst) {
                drop(slot);
                session.close().await;
                return;
            }
            let stale = slot.replace(session);
            drop(slot);

            if let Some(stale) = stale {
                stale.close().await;
            }
            tracing::info!(attempt, "Audit publisher reconnected to broker");
            return;
        }
    }
}

#[async_trait]
impl LogPublisher for ReconnectingPublisher {
    async fn publish(&self, entries: &[LogEntry]) -> Result<(), PublishError> {
        let current = self.shared.session.read().await.clone();
        let session = match current {
            Some(session) if session.is_connected() => session,
            _ => {
                self.schedule_reconnect();
                return Err(PublishError::Unavailable("not connected to broker".to_string()));
            }
        };

        let body = LogEntry::encode_batch(entries)?;
        let result = session.publish(&body).await;
        if result.is_err() && !session.is_connected() {
            self.schedule_reconnect();
        }
        result
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let session = self.shared.session.write().await.take();
        if let Some(session) = session {
            session.close().await;
        }
    }
}

/// Opens confirm-mode RabbitMQ channels on the durable audit queue
pub struct AmqpPublishConnector {
    url: String,
    queue: String,
    timeout: Duration,
}

impl AmqpPublishConnector {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            url: config.url.clone(),
            queue: config.queue.clone(),
            timeout: config.publish_timeout(),
        }
    }
}

#[async_trait]
impl PublisherConnector for AmqpPublishConnector {
    async fn connect(&self) -> Result<Box<dyn PublishSession>, BrokerError> {
        let connection = broker::connect(&self.url).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        broker::declare_durable_queue(&channel, &self.queue).await?;

        tracing::info!(queue = %self.queue, "Connected audit publisher to broker");

        Ok(Box::new(AmqpSession {
            connection,
            channel,
            queue: self.queue.clone(),
            timeout: self.timeout,
        }))
    }
}

/// Persistent delivery with publisher confirms.
///
/// `lapin::Channel` is safe to share between tasks, so no extra locking is needed.
struct AmqpSession {
    connection: Connection,
    channel: Channel,
    queue: String,
    timeout: Duration,
}

#[async_trait]
impl PublishSession for AmqpSession {
    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn publish(&self, body: &[u8]) -> Result<(), PublishError> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT_DELIVERY);

        let publish = async {
            let confirm = self
                .channel
                .basic_publish(
                    "",
                    &self.queue,
                    BasicPublishOptions::default(),
                    body,
                    properties,
                )
                .await?;
            confirm.await
        };

        match tokio::time::timeout(self.timeout, publish).await {
            Err(_) => Err(PublishError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(PublishError::Broker(e.to_string())),
            Ok(Ok(confirmation)) if confirmation.is_nack() => Err(PublishError::Rejected),
            Ok(Ok(_)) => Ok(()),
        }
    }

    async fn close(&self) {
        if !self.connection.status().connected() {
            return;
        }
        match self.connection.close(200, "gateway shutdown").await {
            Ok(()) => tracing::info!("Audit publisher connection closed"),
            Err(e) => tracing::warn!(error = %e, "Failed to close audit publisher connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// In-process broker: one live session at a time, which a test can kill
    #[derive(Default)]
    struct FakeBroker {
        connects: AtomicUsize,
        refuse_connects: AtomicUsize,
        closed_sessions: AtomicUsize,
        alive: Mutex<Option<Arc<AtomicBool>>>,
        published: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeBroker {
        fn drop_connection(&self) {
            if let Some(alive) = self.alive.lock().unwrap().as_ref() {
                alive.store(false, Ordering::SeqCst);
            }
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn published(&self) -> usize {
            self.published.lock().unwrap().len()
        }
    }

    struct FakeSession {
        alive: Arc<AtomicBool>,
        broker: Arc<FakeBroker>,
    }

    #[async_trait]
    impl PublishSession for FakeSession {
        fn is_connected(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn publish(&self, body: &[u8]) -> Result<(), PublishError> {
            if !self.is_connected() {
                return Err(PublishError::Broker("connection reset".to_string()));
            }
            self.broker.published.lock().unwrap().push(body.to_vec());
            Ok(())
        }

        async fn close(&self) {
            self.broker.closed_sessions.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeConnector(Arc<FakeBroker>);

    #[async_trait]
    impl PublisherConnector for FakeConnector {
        async fn connect(&self) -> Result<Box<dyn PublishSession>, BrokerError> {
            let broker = &self.0;
            broker.connects.fetch_add(1, Ordering::SeqCst);
            if broker.refuse_connects.load(Ordering::SeqCst) > 0 {
                broker.refuse_connects.fetch_sub(1, Ordering::SeqCst);
                return Err(BrokerError::Connect("connection refused".to_string()));
            }

            let alive = Arc::new(AtomicBool::new(true));
            *broker.alive.lock().unwrap() = Some(alive.clone());
            Ok(Box::new(FakeSession {
                alive,
                broker: broker.clone(),
            }))
        }
    }

    async fn start(broker: &Arc<FakeBroker>) -> ReconnectingPublisher {
        ReconnectingPublisher::start(
            Arc::new(FakeConnector(broker.clone())),
            1,
            Duration::from_millis(100),
        )
        .await
        .unwrap()
    }

    fn entries() -> Vec<LogEntry> {
        vec![LogEntry {
            timestamp: Utc::now(),
            input_features: serde_json::Map::new(),
            prediction_probability: 0.5,
            model_identifier: "home_credit_default".to_string(),
        }]
    }

    #[test]
    fn test_publish_error_kinds() {
        assert_eq!(PublishError::Rejected.kind(), "rejected");
        assert_eq!(
            PublishError::Timeout(Duration::from_secs(2)).to_string(),
            "publish not confirmed within 2s"
        );
        assert_eq!(
            PublishError::Unavailable("channel is not connected".to_string()).kind(),
            "unavailable"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_resume_after_connection_loss() {
        let broker = Arc::new(FakeBroker::default());
        let publisher = start(&broker).await;

        publisher.publish(&entries()).await.unwrap();
        broker.drop_connection();

        let started = tokio::time::Instant::now();
        let err = publisher.publish(&entries()).await.unwrap_err();
        assert!(matches!(err, PublishError::Unavailable(_)));
        assert_eq!(started.elapsed(), Duration::ZERO, "a dead session must fail fast");
        assert!(publisher.publish(&entries()).await.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;

        publisher.publish(&entries()).await.unwrap();
        assert_eq!(broker.connects(), 2, "one reconnect for repeated failures");
        assert_eq!(broker.published(), 2);
        assert_eq!(broker.closed_sessions.load(Ordering::SeqCst), 1, "dead session closed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_retries_until_broker_returns() {
        let broker = Arc::new(FakeBroker::default());
        let publisher = start(&broker).await;

        broker.drop_connection();
        broker.refuse_connects.store(2, Ordering::SeqCst);
        assert!(publisher.publish(&entries()).await.is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(publisher.publish(&entries()).await.is_err());
        assert_eq!(broker.connects(), 3);

        tokio::time::sleep(Duration::from_millis(100)).await;
        publisher.publish(&entries()).await.unwrap();
        assert_eq!(broker.connects(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_reconnecting() {
        let broker = Arc::new(FakeBroker::default());
        let publisher = start(&broker).await;

        broker.drop_connection();
        assert!(publisher.publish(&entries()).await.is_err());
        publisher.close().await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(broker.connects(), 1);
        assert_eq!(broker.closed_sessions.load(Ordering::SeqCst), 1);
        assert!(matches!(
            publisher.publish(&entries()).await,
            Err(PublishError::Unavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_keeps_accepting_entries_during_outage() {
        let broker = Arc::new(FakeBroker::default());
        let sink = AuditSink::spawn(Arc::new(start(&broker).await), 8);

        broker.drop_connection();
        for _ in 0..3 {
            assert!(sink.submit(entries()).is_ok());
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(broker.published(), 0, "entries submitted during the outage are lost");
        assert_eq!(broker.connects(), 2);

        assert!(sink.submit(entries()).is_ok());
        sink.close().await;
        assert_eq!(broker.published(), 1);
    }

    #[tokio::test]
    async fn test_start_fails_after_bounded_attempts() {
        let broker = Arc::new(FakeBroker::default());
        broker.refuse_connects.store(5, Ordering::SeqCst);

        let result =
            ReconnectingPublisher::start(Arc::new(FakeConnector(broker.clone())), 3, Duration::from_millis(1))
                .await;
        assert!(matches!(result, Err(BrokerError::Connect(_))));
        assert_eq!(broker.connects(), 3);
    }
}
