pub mod channel;
pub mod message;
pub mod store;

pub use channel::{SignalingChannel, SignalingSubscription};
pub use message::{channel_id, ChannelDocument, SignalingMessage, SignalingPayload};
pub use store::{MemorySignalingStore, SignalingStore};
