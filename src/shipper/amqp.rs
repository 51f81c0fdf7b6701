use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
    types::FieldTable,
    Connection, Consumer,
};

use super::{BrokerConnector, Delivery, DeliveryHandle, DeliveryStream};
use crate::broker::{self, BrokerError};
use crate::config::BrokerConfig;

const CONSUMER_TAG: &str = "log-shipper";

/// RabbitMQ consumer sessions on the audit queue
pub struct AmqpConnector {
    url: String,
    queue: String,
}

impl AmqpConnector {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            url: config.url.clone(),
            queue: config.queue.clone(),
        }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self, prefetch: u16) -> Result<Box<dyn DeliveryStream>, BrokerError> {
        let connection = broker::connect(&self.url).await?;
        let channel = connection.create_channel().await?;
        broker::declare_durable_queue(&channel, &self.queue).await?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                &self.queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(queue = %self.queue, "Connected log shipper to broker");

        Ok(Box::new(AmqpDeliveryStream {
            connection,
            consumer,
        }))
    }
}

struct AmqpDeliveryStream {
    connection: Connection,
    consumer: Consumer,
}

#[async_trait]
impl DeliveryStream for AmqpDeliveryStream {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let delivery = self.consumer.next().await?;
        Some(
            delivery
                .map(|delivery| Delivery {
                    body: delivery.data,
                    handle: Box::new(AmqpHandle(delivery.acker)),
                })
                .map_err(BrokerError::from),
        )
    }

    async fn close(&mut self) {
        if !self.connection.status().connected() {
            return;
        }
        match self.connection.close(200, "log shipper session ended").await {
            Ok(()) => tracing::debug!("Closed log shipper broker connection"),
            Err(e) => tracing::debug!(error = %e, "Failed to close log shipper broker connection"),
        }
    }
}

struct AmqpHandle(Acker);

#[async_trait]
impl DeliveryHandle for AmqpHandle {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        self.0
            .nack(BasicNackOptions {
                requeue: false,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}
