//! RabbitMQ implementation on top of `lapin`
//!
//! Channels are opened in confirm mode so a negative publisher confirm surfaces as
//! `publish() == Ok(false)`.

use super::{
    Binding, BrokerChannel, BrokerConnection, BrokerConnector, CloseHook, Delivery,
    DeliveryStream, ExchangeKind, ExchangeSpec, MessageProperties, QueueSpec,
};
use crate::error::{BrokerError, ClosedResource};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::io;
use std::sync::Arc;
use tracing::debug;

const REPLY_SUCCESS: u16 = 200;
const ACCESS_REFUSED: u16 = 403;
const PERSISTENT_DELIVERY_MODE: u8 = 2;

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::IOError(io_err) => {
                BrokerError::Io(io::Error::new(io_err.kind(), io_err.to_string()))
            }
            lapin::Error::ProtocolError(amqp_err) => {
                let code = amqp_err.get_id();
                let message = amqp_err.get_message().as_str().to_string();
                if code == ACCESS_REFUSED {
                    BrokerError::AccessRefused(message)
                } else {
                    BrokerError::Protocol { code, message }
                }
            }
            lapin::Error::InvalidChannelState(_) => BrokerError::Closed(ClosedResource::Channel),
            lapin::Error::InvalidConnectionState(_) => {
                BrokerError::Closed(ClosedResource::Connection)
            }
            other => BrokerError::Other(other.to_string()),
        }
    }
}

/// Opens RabbitMQ connections
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        debug!("AMQP connection opened");
        Ok(Arc::new(AmqpConnection { inner: connection }))
    }
}

pub struct AmqpConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let channel = self.inner.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(Arc::new(AmqpChannel { inner: channel }))
    }

    fn on_close(&self, hook: CloseHook) {
        self.inner.on_error(move |err| hook(BrokerError::from(err)));
    }

    fn is_connected(&self) -> bool {
        self.inner.status().connected()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close(REPLY_SUCCESS, "Bye").await?;
        Ok(())
    }
}

pub struct AmqpChannel {
    inner: Channel,
}

fn queue_arguments(spec: &QueueSpec) -> FieldTable {
    let mut arguments = FieldTable::default();
    if let Some(dead_letter) = &spec.dead_letter {
        arguments.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from(dead_letter.exchange.as_str())),
        );
        arguments.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(LongString::from(dead_letter.routing_key.as_str())),
        );
    }
    arguments
}

fn basic_properties(properties: &MessageProperties) -> BasicProperties {
    let mut props = BasicProperties::default()
        .with_content_type(ShortString::from(properties.content_type.as_str()));
    if properties.persistent {
        props = props.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
    }
    if let Some(timestamp) = properties.timestamp {
        props = props.with_timestamp(timestamp.timestamp().max(0) as u64);
    }
    if let Some(id) = &properties.message_id {
        props = props.with_message_id(ShortString::from(id.as_str()));
    }
    props
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        let kind = match spec.kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        };
        self.inner
            .exchange_declare(
                &spec.name,
                kind,
                ExchangeDeclareOptions {
                    durable: spec.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError> {
        self.inner
            .queue_declare(
                &spec.name,
                QueueDeclareOptions {
                    durable: spec.durable,
                    ..Default::default()
                },
                queue_arguments(spec),
            )
            .await?;
        Ok(())
    }

    async fn bind_queue(&self, binding: &Binding) -> Result<(), BrokerError> {
        self.inner
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> Result<bool, BrokerError> {
        let confirmation = self
            .inner
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                basic_properties(properties),
            )
            .await?
            .await?;
        Ok(!confirmation.is_nack())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        self.inner
            .basic_qos(count, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let deliveries = consumer.map(|item| {
            item.map(|delivery| Delivery {
                delivery_tag: delivery.delivery_tag,
                message_id: delivery
                    .properties
                    .message_id()
                    .as_ref()
                    .map(|id| id.as_str().to_string()),
                redelivered: delivery.redelivered,
                data: delivery.data,
            })
            .map_err(BrokerError::from)
        });
        Ok(deliveries.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.inner
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.inner
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close(REPLY_SUCCESS, "Bye").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::DeadLetter;
    use crate::classifier::ErrorClass;
    use chrono::TimeZone;
    use chrono::Utc;

    #[test]
    fn test_queue_arguments_carry_dead_letter() {
        let spec = QueueSpec {
            name: "events-high-priority".into(),
            durable: true,
            dead_letter: Some(DeadLetter {
                exchange: "dlx".into(),
                routing_key: "dead-letter".into(),
            }),
        };
        let arguments = queue_arguments(&spec);
        let inner = arguments.inner();
        assert_eq!(
            inner.get(&ShortString::from("x-dead-letter-exchange")),
            Some(&AMQPValue::LongString(LongString::from("dlx")))
        );
        assert_eq!(
            inner.get(&ShortString::from("x-dead-letter-routing-key")),
            Some(&AMQPValue::LongString(LongString::from("dead-letter")))
        );

        let plain = QueueSpec {
            dead_letter: None,
            ..spec
        };
        assert!(queue_arguments(&plain).inner().is_empty());
    }

    #[test]
    fn test_basic_properties() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let props = basic_properties(
            &MessageProperties::json()
                .with_timestamp(timestamp)
                .with_message_id("4b8c8a0e-3a43-4d55-9a4e-1c2f0b6c9d11"),
        );

        assert_eq!(props.delivery_mode(), &Some(PERSISTENT_DELIVERY_MODE));
        assert_eq!(
            props.content_type().as_ref().map(|c| c.as_str()),
            Some("application/json")
        );
        assert_eq!(props.timestamp(), &Some(timestamp.timestamp() as u64));
        assert_eq!(
            props.message_id().as_ref().map(|id| id.as_str()),
            Some("4b8c8a0e-3a43-4d55-9a4e-1c2f0b6c9d11")
        );
    }

    #[test]
    fn test_lapin_io_error_is_transient() {
        let err = lapin::Error::IOError(Arc::new(io::Error::from(
            io::ErrorKind::ConnectionRefused,
        )));
        let broker_err = BrokerError::from(err);
        assert!(matches!(broker_err, BrokerError::Io(_)));
        assert_eq!(broker_err.class(), ErrorClass::Transient);
    }
}
