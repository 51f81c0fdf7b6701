//! Audit logging of served predictions onto the durable queue

pub mod publisher;
pub mod sink;

pub use publisher::{
    AmqpPublishConnector, LogPublisher, PublishError, PublishSession, PublisherConnector,
    ReconnectingPublisher,
};
pub use sink::{AuditSink, SubmitError};
