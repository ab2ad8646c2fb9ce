use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::signaling::message::channel_id;
use crate::utils::random_id;

/// Статус сессии звонка
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Idle,
    Dialing,
    Receiving,
    Active,
    Ended,
    Error,
}

impl CallStatus {
    /// Ended и Error терминальны для объекта сессии: следующий звонок —
    /// это новая сессия, автоматических повторов нет
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Error)
    }
}

/// Таблица допустимых переходов. Active достижим только через
/// Dialing или Receiving; из Idle звонок может лишь начаться или
/// закончиться (отбой собеседника до offer-а).
pub fn transition_allowed(from: CallStatus, to: CallStatus) -> bool {
    use CallStatus::*;
    matches!(
        (from, to),
        (Idle, Dialing)
            | (Idle, Receiving)
            | (Idle, Ended)
            | (Dialing, Active)
            | (Receiving, Active)
            | (Dialing, Ended)
            | (Receiving, Ended)
            | (Active, Ended)
            | (Dialing, Error)
            | (Receiving, Error)
            | (Active, Error)
            | (Error, Ended)
    )
}

/// Эфемерные данные одного звонка; живут от инициации/приёма до
/// terminal-состояния
pub struct CallSession {
    /// короткий id для логов
    pub session_id: String,
    pub local_user_id: String,
    pub remote_user_id: String,
    pub channel_id: String,
    /// выставляется один раз при создании сессии
    pub is_initiator: bool,
    status: Mutex<CallStatus>,
    /// offer собеседника, записанный до accept-а
    remote_offer: Mutex<Option<RTCSessionDescription>>,
}

impl CallSession {
    pub fn new(
        local_user_id: impl Into<String>,
        remote_user_id: impl Into<String>,
        is_initiator: bool,
    ) -> Self {
        let local_user_id = local_user_id.into();
        let remote_user_id = remote_user_id.into();
        let channel_id = channel_id(&local_user_id, &remote_user_id);
        Self {
            session_id: random_id(),
            local_user_id,
            remote_user_id,
            channel_id,
            is_initiator,
            status: Mutex::new(CallStatus::Idle),
            remote_offer: Mutex::new(None),
        }
    }

    pub fn status(&self) -> CallStatus {
        *self.status.lock().unwrap()
    }

    /// Атомарная смена статуса по таблице; возвращает прежний статус
    /// при успехе
    pub(crate) fn try_transition(&self, to: CallStatus) -> Option<CallStatus> {
        let mut status = self.status.lock().unwrap();
        if transition_allowed(*status, to) {
            let from = *status;
            *status = to;
            Some(from)
        } else {
            None
        }
    }

    pub(crate) fn record_offer(&self, offer: RTCSessionDescription) {
        *self.remote_offer.lock().unwrap() = Some(offer);
    }

    pub(crate) fn take_offer(&self) -> Option<RTCSessionDescription> {
        self.remote_offer.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CallStatus::*;

    #[test]
    fn test_active_requires_dialing_or_receiving() {
        assert!(!transition_allowed(Idle, Active));
        assert!(transition_allowed(Dialing, Active));
        assert!(transition_allowed(Receiving, Active));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for to in [Idle, Dialing, Receiving, Active, Error] {
            assert!(!transition_allowed(Ended, to));
        }
        // из Error только в Ended
        assert!(transition_allowed(Error, Ended));
        assert!(!transition_allowed(Error, Active));
    }

    #[test]
    fn test_session_transitions() {
        let session = CallSession::new("alice", "bob", true);
        assert_eq!(session.status(), Idle);
        assert_eq!(session.channel_id, "alice_bob");

        assert_eq!(session.try_transition(Active), None);
        assert_eq!(session.try_transition(Dialing), Some(Idle));
        assert_eq!(session.try_transition(Active), Some(Dialing));
        assert_eq!(session.try_transition(Ended), Some(Active));
        assert!(session.status().is_terminal());
        assert_eq!(session.try_transition(Dialing), None);
    }
}
