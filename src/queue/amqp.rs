use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use log::{debug, info, warn};
use uuid::Uuid;

use super::{BrokerError, BrokerResult, Delivery, Envelope, MessageBroker};
use crate::core::config::RabbitMqConfig;

const PERSISTENT: u8 = 2;

impl From<lapin::Error> for BrokerError {
    fn from(e: lapin::Error) -> Self {
        match e {
            lapin::Error::InvalidConnectionState(_) | lapin::Error::IOError(_) => {
                BrokerError::Connection(e.to_string())
            }
            _ => BrokerError::Channel(e.to_string()),
        }
    }
}

/// RabbitMQ client bound to a single durable queue.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    queue: String,
    consumer: Option<Consumer>,
}

impl AmqpBroker {
    pub async fn connect(config: &RabbitMqConfig) -> BrokerResult<Self> {
        let uri = config
            .uri()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let channel = connection.create_channel().await?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(
            "Connected to RabbitMQ at {}:{}, queue {}",
            config.host, config.port, config.queue
        );
        Ok(Self {
            connection,
            channel,
            queue: config.queue.clone(),
            consumer: None,
        })
    }

    /// Retries `connect` while the broker is still coming up.
    pub async fn connect_with_retry(config: &RabbitMqConfig) -> BrokerResult<Self> {
        let attempts = config.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::connect(config).await {
                Ok(broker) => return Ok(broker),
                Err(e) if attempt < attempts => {
                    warn!(
                        "RabbitMQ connection attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        attempts,
                        e,
                        config.connect_retry_delay()
                    );
                    tokio::time::sleep(config.connect_retry_delay()).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Starts manual-ack consumption with at most `prefetch` unacknowledged deliveries.
    pub async fn subscribe(&mut self, prefetch: u16) -> BrokerResult<()> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer_tag = format!("wishlist-worker-{}", Uuid::now_v7());
        let consumer = self
            .channel
            .basic_consume(
                &self.queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            "Consuming from {} as {} (prefetch={})",
            self.queue, consumer_tag, prefetch
        );
        self.consumer = Some(consumer);
        Ok(())
    }

    pub async fn close(&self) -> BrokerResult<()> {
        self.channel.close(200, "worker stopped").await?;
        self.connection.close(200, "worker stopped").await?;
        info!("RabbitMQ connection closed");
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn receive(&mut self) -> Option<BrokerResult<Delivery>> {
        let consumer = self.consumer.as_mut()?;
        let delivery = consumer.next().await?;
        Some(
            delivery
                .map(|delivery| Delivery {
                    tag: delivery.delivery_tag,
                    body: delivery.data,
                    redelivered: delivery.redelivered,
                })
                .map_err(BrokerError::from),
        )
    }

    async fn ack(&self, tag: u64) -> BrokerResult<()> {
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn nack(&self, tag: u64, requeue: bool) -> BrokerResult<()> {
        self.channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await?;
        Ok(())
    }

    async fn publish(&self, envelope: &Envelope) -> BrokerResult<()> {
        let body = envelope.to_vec()?;
        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;

        debug!(
            "Published {} message to {}: {:?}",
            envelope.message_type, self.queue, envelope.payload
        );
        Ok(())
    }
}
