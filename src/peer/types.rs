use serde::{Deserialize, Serialize};

/// ICE кандидат для WebRTC соединения
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        id: impl Into<String>,
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "turn".into(),
            url: url.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// События peer-соединения к оркестратору; заменяют прямые emit-вызовы
/// в обработчиках — сессия не держит глобального состояния.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Собран локальный кандидат, нужно переслать собеседнику
    LocalCandidate(IceCandidate),
    /// Пришла первая дорожка нового удалённого стрима
    RemoteStreamReady { stream_id: String },
    /// Соединение установлено
    Connected,
    /// Соединение просело, запущен grace-период
    ConnectionProblem,
    /// Соединение восстановилось в течение grace-периода
    ConnectionRecovered,
    /// Соединение потеряно окончательно (grace истёк или peer закрыт)
    ConnectionLost,
}
