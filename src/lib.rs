//! Движок P2P звонков HeartWise: сигнальный канал поверх документного
//! хранилища, peer-соединение с медиа дорожками и оркестратор
//! состояния звонка. UI подписывается на события оркестратора и
//! дергает его операции; хранилище и захват устройств внедряются
//! хостом приложения.

pub mod call;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod signaling;
pub mod utils;

pub use call::{CallEvent, CallOrchestrator, CallStatus};
pub use config::CallConfig;
pub use error::{CallError, CallResult};
pub use media::{MediaConstraints, MediaDevices, SyntheticMediaDevices};
pub use peer::{IceCandidate, RtcPeer, ServerConfig};
pub use signaling::{MemorySignalingStore, SignalingChannel, SignalingStore};
