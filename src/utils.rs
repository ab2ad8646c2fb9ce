use crate::peer::types::ServerConfig;
use rand::Rng;

/// короткий id для логов и сопоставления сессий
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Дополняет URL ICE сервера схемой протокола, если она не указана
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    // Если url уже начинается с "turn:" или "stun:", возвращаем как есть
    if config.url.starts_with("turn:") || config.url.starts_with("stun:") {
        config.url.clone()
    } else {
        let scheme = if config.kind == "turn" { "turn:" } else { "stun:" };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_id_format() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(random_id(), random_id());
    }

    #[test]
    fn test_add_ice_url_scheme() {
        let stun = ServerConfig::stun("s1", "stun.example.org:3478");
        assert_eq!(add_ice_url_scheme(&stun), "stun:stun.example.org:3478");

        let turn = ServerConfig::turn("t1", "turn.example.org:3478", "user", "pass");
        assert_eq!(add_ice_url_scheme(&turn), "turn:turn.example.org:3478");

        let already = ServerConfig::stun("s2", "stun:stun.example.org:3478");
        assert_eq!(add_ice_url_scheme(&already), "stun:stun.example.org:3478");
    }
}
