use async_trait::async_trait;

use crate::{domain::MessageId, Result};

/// Outcome of a single forward attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The message was copied to the target channel.
    Forwarded,
    /// No message exists with this id (deleted, or never allocated).
    Missing,
    /// The id refers to something that cannot be forwarded (service
    /// message such as a pin/join notice, or protected content).
    NotForwardable,
}

/// Channel client port.
///
/// The channel pair (source, target) is fixed at adapter construction, so the
/// relay loop only speaks in source-message ids. Ids are enumerated by the
/// loop itself, strictly ascending; the port answers one id at a time.
#[async_trait]
pub trait ChannelPort: Send + Sync {
    /// Forward the source message with this id to the target channel.
    async fn forward(&self, id: MessageId) -> Result<ForwardOutcome>;
}
