//! The boundary between the bridge and the message bus.
//!
//! The dispatcher only ever sees these traits, so anything that can publish,
//! pull and correlate replies can sit behind the bridge. [`memory::MemoryBus`]
//! is the in-process implementation the binary runs with.

use crate::error::BusError;
use crate::message::Message;
use async_trait::async_trait;

pub mod memory;

/// Handle to a bus connection. Shared by every in-flight request, so
/// implementations must tolerate concurrent use.
pub trait Messagebus: Send + Sync {
    fn producer(&self) -> Result<&dyn Producer, BusError>;
    fn consumer(&self) -> Result<&dyn Consumer, BusError>;
    fn requester(&self) -> Result<&dyn Requester, BusError>;
    fn responser(&self) -> Result<&dyn Responser, BusError>;
}

#[async_trait]
pub trait Producer: Send + Sync {
    async fn batch_produce(&self, messages: &[Message], queue_name: &str) -> Result<(), BusError>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Pulls whatever is available, up to `num` messages. An empty result is not an error.
    async fn consume(&self, queue_name: &str, num: usize) -> Result<Vec<Message>, BusError>;
}

#[async_trait]
pub trait Requester: Send + Sync {
    /// Publishes `message` and blocks until a correlated reply arrives or `timeout_ms` elapses.
    async fn request(
        &self,
        message: Message,
        queue_name: &str,
        timeout_ms: u64,
    ) -> Result<Message, BusError>;
}

#[async_trait]
pub trait Responser: Send + Sync {
    async fn response_tmp_message(&self, message: Message, queue_name: &str)
        -> Result<(), BusError>;
}
