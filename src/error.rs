use thiserror::Error;

use crate::call::session::CallStatus;

/// Result-алиас для операций движка звонков
pub type CallResult<T> = std::result::Result<T, CallError>;

/// Ошибки звонка; каждая завершает попытку, автоматических ретраев нет.
/// Hangup от собеседника ошибкой не является.
#[derive(Debug, Error)]
pub enum CallError {
    /// Доступ к камере/микрофону не получен
    #[error("media access error: {0}")]
    MediaAccess(String),

    /// Запись в сигнальный документ не удалась
    #[error("signaling write error: {0}")]
    SignalingWrite(String),

    /// Чтение/подписка сигнального документа не удалась
    #[error("signaling read error: {0}")]
    SignalingRead(String),

    /// SDP/ICE ошибка от peer-соединения
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// Действие пользователя в недопустимом состоянии сессии
    #[error("{op} is not allowed while call is {status:?}")]
    InvalidState { op: &'static str, status: CallStatus },
}

impl From<webrtc::Error> for CallError {
    fn from(e: webrtc::Error) -> Self {
        Self::Negotiation(e.to_string())
    }
}

impl CallError {
    pub fn media_access(msg: impl std::fmt::Display) -> Self {
        Self::MediaAccess(msg.to_string())
    }

    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Self::Negotiation(msg.to_string())
    }

    pub fn signaling_write(msg: impl std::fmt::Display) -> Self {
        Self::SignalingWrite(msg.to_string())
    }

    pub fn signaling_read(msg: impl std::fmt::Display) -> Self {
        Self::SignalingRead(msg.to_string())
    }

    pub fn invalid_state(op: &'static str, status: CallStatus) -> Self {
        Self::InvalidState { op, status }
    }

    /// true, если ошибку нужно показать пользователю как toast
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::InvalidState { .. })
    }
}
