//! Log shipper
//!
//! Drains the durable audit queue into object storage. Messages are buffered
//! unacknowledged until the batch containing them has been written; only then are
//! they acknowledged, so a crash before the write leaves them on the broker for
//! redelivery.

pub mod amqp;
pub mod buffer;
pub mod consumer;
pub mod flatten;

use async_trait::async_trait;

use crate::broker::BrokerError;

pub use amqp::AmqpConnector;
pub use buffer::{FlushPolicy, FlushTrigger, LogBatch};
pub use consumer::{LogShipper, ReconnectPolicy, ShipperState};
pub use flatten::flatten;

/// Settles one received message with the broker
#[async_trait]
pub trait DeliveryHandle: Send + Sync + 'static {
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Negative acknowledgement without requeue
    async fn reject(&self) -> Result<(), BrokerError>;
}

pub struct Delivery {
    pub body: Vec<u8>,
    pub handle: Box<dyn DeliveryHandle>,
}

/// Messages from one broker session
#[async_trait]
pub trait DeliveryStream: Send {
    /// `None` once the session has ended
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;

    /// End the session so the broker releases its unacknowledged messages.
    /// Best effort: the connection may already be gone.
    async fn close(&mut self) {}
}

/// Opens consumer sessions on the audit queue
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Connect and start consuming with at most `prefetch` unacknowledged messages
    async fn connect(&self, prefetch: u16) -> Result<Box<dyn DeliveryStream>, BrokerError>;
}
