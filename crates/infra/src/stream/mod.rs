//! Streaming kept events to the partitioned broker.

mod publisher;
mod retry;

pub use publisher::{
    DeadLetter, DeadLetterSink, InMemoryDeadLetterSink, PublisherConfig, PublisherHandle,
    PublisherStats, StreamPublisher, SubmitError,
};
pub use retry::RetryPolicy;
