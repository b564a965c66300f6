//! # Messaging Module
//!
//! AMQP messaging for the filings job pipeline: the envelope wire contract,
//! connection lifecycle, the delayed-exchange publisher and the consumer.
//! [`InMemoryBroker`] stands in for RabbitMQ in tests.

pub mod ack;
pub mod connection;
pub mod consumer;
pub mod envelope;
pub mod in_memory;
pub mod publisher;

pub use ack::{AckHandle, IncomingDelivery, LapinAcker, MessageAcker};
pub use connection::{BrokerConnection, ShutdownHook};
pub use consumer::{
    prepare_consumer, ConsumeOptions, ConsumerStatsSnapshot, PrepareFn, ProcessOutcome,
    QueueConsumer,
};
pub use envelope::{
    DocumentCollection, DocumentIndexRecord, DocumentListRecord, FileReference, JobPayload,
    LinkType, NextKey, QueueEnvelope,
};
pub use in_memory::{InMemoryBroker, PublishedMessage};
pub use publisher::{
    delay_from_properties, delivery_headers, publish_properties, EnvelopePublisher,
    PublisherStats, QueuePublisher,
};
