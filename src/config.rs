use std::time::Duration;

use tracing::warn;

use crate::peer::types::ServerConfig;

/// Дефолтные публичные STUN серверы.
/// TURN relay в дефолтной конфигурации отсутствует — звонки за
/// симметричным NAT могут не устанавливаться, пока пользователь не
/// добавит свой TURN сервер.
pub const DEFAULT_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Период ожидания восстановления соединения перед разрывом звонка
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Таймаут проверки доступности ICE сервера
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Конфигурация звонка; создаётся владельцем сессии, глобального
/// состояния нет.
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub grace_period: Duration,
    pub probe_timeout: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_URLS
                .iter()
                .enumerate()
                .map(|(i, url)| ServerConfig::stun(format!("default-stun-{i}"), *url))
                .collect(),
            grace_period: GRACE_PERIOD,
            probe_timeout: PROBE_TIMEOUT,
        }
    }
}

impl CallConfig {
    /// Устанавливает пользовательские ICE серверы; возвращает false и
    /// оставляет прежний список, если конфигурация невалидна
    pub fn set_ice_servers(&mut self, servers: Vec<ServerConfig>) -> bool {
        for server in &servers {
            if server.url.is_empty() {
                warn!("ice server url cannot be empty");
                return false;
            }

            if server.kind == "turn" && (server.username.is_none() || server.credential.is_none()) {
                warn!("turn servers require username and credential");
                return false;
            }
        }

        self.ice_servers = servers;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_servers_are_stun_only() {
        let config = CallConfig::default();
        assert_eq!(config.ice_servers.len(), 2);
        assert!(config.ice_servers.iter().all(|s| s.kind == "stun"));
    }

    #[test]
    fn test_set_ice_servers_validation() {
        let mut config = CallConfig::default();

        // пустой url отклоняется
        assert!(!config.set_ice_servers(vec![ServerConfig::stun("s", "")]));
        assert_eq!(config.ice_servers.len(), 2);

        // turn без credentials отклоняется
        let bare_turn = ServerConfig {
            id: "t".into(),
            kind: "turn".into(),
            url: "turn.example.org".into(),
            username: None,
            credential: None,
        };
        assert!(!config.set_ice_servers(vec![bare_turn]));

        // валидный turn принимается
        let turn = ServerConfig::turn("t", "turn.example.org", "user", "pass");
        assert!(config.set_ice_servers(vec![turn]));
        assert_eq!(config.ice_servers.len(), 1);
    }
}
