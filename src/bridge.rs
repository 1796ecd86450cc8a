use crate::conf::Config;
use crate::health::{HealthStatus, SharedHealthState};
use crate::transform::{Message, MessageTransformer};
use anyhow::{Context, Error};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};

const PREVIEW_LIMIT: usize = 200;

/// What the bridge does with a delivery once the transformer has run.
#[derive(Debug)]
pub enum Disposition<'a> {
    /// Publish this message to the target exchange.
    Publish(Message<'a>),
    /// Drop the delivery without requeue; retrying cannot fix it.
    Reject(Error),
}

/// Run `transformer` over `input`, or pass it through untouched when there is none.
pub async fn disposition<'a>(
    transformer: Option<&dyn MessageTransformer>,
    input: Message<'a>,
) -> Disposition<'a> {
    match transformer {
        Some(transformer) => match transformer.transform(input).await {
            Ok(output) => Disposition::Publish(output),
            Err(e) => Disposition::Reject(e),
        },
        None => Disposition::Publish(input),
    }
}

pub struct MessageBridge {
    source_channel: Channel,
    target_channel: Channel,
    source_connection: Connection,
    target_connection: Connection,
    config: Config,
    health_state: SharedHealthState,
    transformer: Option<Arc<dyn MessageTransformer>>,
}

impl MessageBridge {
    /// Attempts to connect to a `RabbitMQ` instance,
    /// retrying up to 10 times with exponential backoff.
    async fn connect_with_retry(uri: &str, context_msg: &str) -> anyhow::Result<Connection> {
        const MAX_RETRIES: u8 = 10;
        const INITIAL_DELAY: Duration = Duration::from_secs(1);
        const MAX_DELAY: Duration = Duration::from_secs(30);

        let mut delay = INITIAL_DELAY;
        let sanitized_uri = sanitize_uri_for_logging(uri);

        for attempt in 1..=MAX_RETRIES {
            info!(
                event = "amqp_connecting",
                uri = %sanitized_uri,
                attempt,
                max_attempts = MAX_RETRIES,
                "{context_msg}"
            );

            match Connection::connect(uri, ConnectionProperties::default()).await {
                Ok(conn) => {
                    info!(
                        event = "amqp_connected",
                        uri = %sanitized_uri,
                        attempt,
                        "Connected to RabbitMQ"
                    );
                    return Ok(conn);
                }
                Err(e) => {
                    error!(
                        event = "amqp_connect_failed",
                        uri = %sanitized_uri,
                        attempt,
                        max_attempts = MAX_RETRIES,
                        error = %e,
                        hint = connect_failure_hint(&format!("{e:?}")),
                        "{context_msg}"
                    );

                    if attempt < MAX_RETRIES {
                        warn!(event = "amqp_connect_retry", delay = ?delay, "Retrying connection");
                        time::sleep(delay).await;
                        // Exponential backoff, capped at MAX_DELAY
                        delay = std::cmp::min(delay * 2, MAX_DELAY);
                    } else {
                        return Err(e).context(format!(
                            "{context_msg} after {MAX_RETRIES} attempts to {sanitized_uri}",
                        ));
                    }
                }
            }
        }
        Err(anyhow::anyhow!("Exhausted all connection retries."))
    }

    pub async fn new(
        config: Config,
        health_state: SharedHealthState,
        transformer: Option<Arc<dyn MessageTransformer>>,
    ) -> anyhow::Result<Self> {
        {
            let mut state = health_state.write().await;
            state.liveness = HealthStatus::Starting;
            state.readiness = HealthStatus::Starting;
        }

        info!(
            event = "bridge_initializing",
            source_queue = %config.source_queue,
            target_exchange = %config.target_exchange,
            target_routing_key = %config.target_routing_key,
            transform = transformer.is_some(),
            "Starting MessageBridge initialization"
        );

        let source_conn =
            Self::connect_with_retry(&config.source_dsn, "Failed to connect to source RabbitMQ")
                .await
                .context("Source RabbitMQ connection failed")?;

        let source_channel = source_conn
            .create_channel()
            .await
            .context("Failed to create source channel")?;

        let target_conn =
            Self::connect_with_retry(&config.target_dsn, "Failed to connect to target RabbitMQ")
                .await
                .context("Target RabbitMQ connection failed")?;

        let target_channel = target_conn
            .create_channel()
            .await
            .context("Failed to create target channel")?;

        target_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms on target channel")?;

        source_channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .context("Failed to set QoS")?;

        info!(
            event = "bridge_initialized",
            "Connected to both RabbitMQ instances"
        );

        {
            let mut state = health_state.write().await;
            state.liveness = HealthStatus::Healthy;
            state.readiness = HealthStatus::Healthy;
        }

        Ok(Self {
            source_channel,
            target_channel,
            source_connection: source_conn,
            target_connection: target_conn,
            config,
            health_state,
            transformer,
        })
    }

    /// Check if connections are still alive
    fn is_connected(&self) -> bool {
        self.source_connection.status().connected() && self.target_connection.status().connected()
    }

    async fn mark_unhealthy(&self) {
        let mut state = self.health_state.write().await;
        state.liveness = HealthStatus::Unhealthy;
        state.readiness = HealthStatus::Unhealthy;
    }

    async fn record_published(&self) {
        let mut state = self.health_state.write().await;
        state.last_message_processed = Some(std::time::Instant::now());
        state.messages_published += 1;
    }

    async fn record_rejected(&self) {
        self.health_state.write().await.messages_rejected += 1;
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), Error> {
        if let Err(e) = delivery
            .nack(BasicNackOptions {
                requeue,
                multiple: false,
            })
            .await
        {
            error!(event = "nack_failed", error = %e, "Failed to nack message");
            self.mark_unhealthy().await;
            return Err(anyhow::anyhow!("Failed to nack: {e}"));
        }
        Ok(())
    }

    async fn handle_delivery(&self, delivery: Delivery) -> Result<(), Error> {
        let input = Message::new(
            Cow::Borrowed(delivery.data.as_slice()),
            delivery.properties.clone(),
            delivery.routing_key.as_str(),
        );

        info!(
            event = "message_received",
            bytes = input.data.len(),
            delivery_tag = delivery.delivery_tag,
            route = %input.route,
            content = %preview(&input.data),
            "Received message"
        );

        let output = match disposition(self.transformer.as_deref(), input).await {
            Disposition::Publish(output) => output,
            Disposition::Reject(e) => {
                warn!(
                    event = "transform_failed",
                    delivery_tag = delivery.delivery_tag,
                    error = %format!("{e:#}"),
                    "Rejecting message without requeue"
                );
                self.nack(&delivery, false).await?;
                self.record_rejected().await;
                return Ok(());
            }
        };

        match self
            .target_channel
            .basic_publish(
                &self.config.target_exchange,
                &self.config.target_routing_key,
                BasicPublishOptions::default(),
                &output.data,
                output.properties,
            )
            .await
        {
            Ok(confirm) => match confirm.await {
                Ok(confirmation) if !broker_accepted(&confirmation) => {
                    error!(
                        event = "publish_nacked",
                        delivery_tag = delivery.delivery_tag,
                        confirmation = ?confirmation,
                        "Target broker did not acknowledge the message"
                    );
                    self.nack(&delivery, true).await
                }
                Ok(_) => {
                    info!(
                        event = "message_published",
                        delivery_tag = delivery.delivery_tag,
                        payload = %preview(&output.data),
                        "Published message to target"
                    );

                    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                        error!(event = "ack_failed", error = %e, "Failed to acknowledge message");
                        self.mark_unhealthy().await;
                        return Err(anyhow::anyhow!("Failed to ack: {e}"));
                    }

                    self.record_published().await;
                    Ok(())
                }
                Err(e) => {
                    error!(event = "publish_unconfirmed", error = %e, "Publisher confirmation failed");
                    self.nack(&delivery, true).await
                }
            },
            Err(e) => {
                error!(event = "publish_failed", error = %e, "Failed to publish message");
                self.nack(&delivery, true).await
            }
        }
    }

    async fn consume(&self, mut consumer: Consumer) -> Result<(), Error> {
        while let Some(delivery_result) = consumer.next().await {
            if !self.is_connected() {
                error!(event = "connection_lost", "Connection lost, stopping consumer loop");
                self.mark_unhealthy().await;
                return Err(anyhow::anyhow!("Connection lost during message processing"));
            }

            match delivery_result {
                Ok(delivery) => self.handle_delivery(delivery).await?,
                Err(e) => {
                    error!(event = "consume_failed", error = %e, "Error receiving message");
                    self.mark_unhealthy().await;
                    return Err(anyhow::anyhow!("Consumer error: {e}"));
                }
            }
        }

        Ok(())
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            event = "consumer_starting",
            queue = %self.config.source_queue,
            "Starting to consume"
        );

        let consumer = self
            .source_channel
            .basic_consume(
                &self.config.source_queue,
                "header_projector",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("Failed to start consuming")?;

        info!(event = "consumer_started", "Consumer started, waiting for messages");

        self.consume(consumer).await?;

        warn!(event = "consumer_ended", "Consumer stream ended");
        self.mark_unhealthy().await;
        Err(anyhow::anyhow!("Consumer stream ended unexpectedly"))
    }
}

/// Only an explicit broker ack lets the source delivery be acked. The target
/// channel runs in confirm mode, so `NotRequested` means confirms were lost.
fn broker_accepted(confirmation: &Confirmation) -> bool {
    matches!(confirmation, Confirmation::Ack(_))
}

/// Printable, truncated view of a payload for logs.
fn preview(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(s) if s.chars().count() > PREVIEW_LIMIT => {
            format!("{}...", s.chars().take(PREVIEW_LIMIT).collect::<String>())
        }
        Ok(s) => s.to_string(),
        Err(_) => format!("<binary data, {} bytes>", data.len()),
    }
}

fn connect_failure_hint(error_debug: &str) -> &'static str {
    if error_debug.contains("ConnectionRefused") || error_debug.contains("Connection refused") {
        "connection refused: broker not running, wrong host/port or blocked by a firewall"
    } else if error_debug.contains("timeout") || error_debug.contains("Timeout") {
        "connection timeout: no response from broker"
    } else if error_debug.contains("auth") || error_debug.contains("Auth") {
        "authentication failed: invalid credentials"
    } else if error_debug.contains("resolution") || error_debug.contains("resolve") {
        "DNS resolution failed: cannot resolve hostname"
    } else {
        "unknown"
    }
}

/// Helper function to sanitize URI for logging (removes password)
fn sanitize_uri_for_logging(uri: &str) -> String {
    if let (Some(at_pos), Some(scheme_end)) = (uri.rfind('@'), uri.find("://")) {
        let credentials_start = scheme_end + 3;
        if at_pos > credentials_start {
            let scheme = &uri[..credentials_start];
            let after_at = &uri[at_pos..];
            if let Some(colon_pos) = uri[credentials_start..at_pos].find(':') {
                let username = &uri[credentials_start..credentials_start + colon_pos];
                return format!("{scheme}{username}:***{after_at}");
            }
        }
    }
    uri.to_string()
}
