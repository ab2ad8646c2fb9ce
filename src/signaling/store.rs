use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{CallError, CallResult};
use crate::signaling::message::{ChannelDocument, SignalingMessage};

/// Ёмкость очереди снимков на подписчика; списки кандидатов
/// append-only, поэтому отставший подписчик ничего не теряет,
/// догнав последний снимок
const SNAPSHOT_QUEUE: usize = 64;

/// Абстракция над документным хранилищем сигнального канала.
/// Продакшен-реализация оборачивает клиент стора приложения;
/// движку звонка важны только merge-семантика и поток изменений.
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Создаёт документ канала. Завершённый (hangup) или пустой
    /// существующий документ сбрасывается под новый звонок; живой
    /// документ — конфликт.
    async fn create(&self, channel_id: &str) -> CallResult<()>;

    /// Записывает сообщение с merge-семантикой по типу
    async fn apply(&self, channel_id: &str, msg: &SignalingMessage) -> CallResult<()>;

    /// Текущий снимок документа
    async fn read(&self, channel_id: &str) -> CallResult<Option<ChannelDocument>>;

    /// Поток снимков при каждом изменении документа
    async fn watch(&self, channel_id: &str) -> CallResult<broadcast::Receiver<ChannelDocument>>;
}

struct ChannelEntry {
    doc: ChannelDocument,
    tx: broadcast::Sender<ChannelDocument>,
}

impl ChannelEntry {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(SNAPSHOT_QUEUE);
        Self {
            doc: ChannelDocument::new(chrono::Utc::now().timestamp_millis()),
            tx,
        }
    }
}

/// In-memory реализация для тестов и локальной разработки
#[derive(Default)]
pub struct MemorySignalingStore {
    channels: Mutex<HashMap<String, ChannelEntry>>,
}

impl MemorySignalingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalingStore for MemorySignalingStore {
    async fn create(&self, channel_id: &str) -> CallResult<()> {
        let mut channels = self.channels.lock().unwrap();
        if let Some(entry) = channels.get_mut(channel_id) {
            if entry.doc.is_finished() || entry.doc.is_empty() {
                // канал пары детерминирован, новый звонок переиспользует
                // документ прошлого — сбрасываем его состояние
                entry.doc = ChannelDocument::new(chrono::Utc::now().timestamp_millis());
                let _ = entry.tx.send(entry.doc.clone());
                debug!(channel_id, "stale signaling channel reset");
                return Ok(());
            }
            return Err(CallError::signaling_write(format!(
                "channel {channel_id} already has a live call"
            )));
        }

        channels.insert(channel_id.to_string(), ChannelEntry::new());
        debug!(channel_id, "signaling channel created");
        Ok(())
    }

    async fn apply(&self, channel_id: &str, msg: &SignalingMessage) -> CallResult<()> {
        let mut channels = self.channels.lock().unwrap();
        // merge-запись создаёт документ, если его ещё нет
        let entry = channels
            .entry(channel_id.to_string())
            .or_insert_with(ChannelEntry::new);
        entry.doc.apply(msg);
        let _ = entry.tx.send(entry.doc.clone());
        Ok(())
    }

    async fn read(&self, channel_id: &str) -> CallResult<Option<ChannelDocument>> {
        let channels = self.channels.lock().unwrap();
        Ok(channels.get(channel_id).map(|entry| entry.doc.clone()))
    }

    async fn watch(&self, channel_id: &str) -> CallResult<broadcast::Receiver<ChannelDocument>> {
        let mut channels = self.channels.lock().unwrap();
        // подписка до создания допустима: принимающая сторона начинает
        // слушать раньше, чем инициатор запишет offer
        let entry = channels
            .entry(channel_id.to_string())
            .or_insert_with(ChannelEntry::new);
        Ok(entry.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::message::SignalingPayload;

    #[tokio::test]
    async fn test_apply_then_read() {
        let store = MemorySignalingStore::new();
        store.create("alice_bob").await.unwrap();
        store
            .apply("alice_bob", &SignalingMessage::new("alice", SignalingPayload::Hangup))
            .await
            .unwrap();

        let doc = store.read("alice_bob").await.unwrap().unwrap();
        assert_eq!(doc.hangup.unwrap().sender_id, "alice");
    }

    #[tokio::test]
    async fn test_watch_delivers_snapshots() {
        let store = MemorySignalingStore::new();
        let mut rx = store.watch("alice_bob").await.unwrap();

        store
            .apply("alice_bob", &SignalingMessage::new("bob", SignalingPayload::Hangup))
            .await
            .unwrap();

        let snapshot = rx.recv().await.unwrap();
        assert!(snapshot.is_finished());
    }

    #[tokio::test]
    async fn test_create_conflicts_with_live_call() {
        let store = MemorySignalingStore::new();
        store.create("alice_bob").await.unwrap();

        let offer: webrtc::peer_connection::sdp::session_description::RTCSessionDescription =
            serde_json::from_value(serde_json::json!({
                "type": "offer",
                "sdp": "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            }))
            .unwrap();
        store
            .apply(
                "alice_bob",
                &SignalingMessage::new("alice", SignalingPayload::Offer { sdp: offer }),
            )
            .await
            .unwrap();

        assert!(store.create("alice_bob").await.is_err());

        // после hangup канал можно инициализировать заново
        store
            .apply("alice_bob", &SignalingMessage::new("alice", SignalingPayload::Hangup))
            .await
            .unwrap();
        store.create("alice_bob").await.unwrap();

        let doc = store.read("alice_bob").await.unwrap().unwrap();
        assert!(doc.is_empty());
    }
}
