use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::CallResult;
use crate::signaling::message::{channel_id, ChannelDocument, SignalingMessage, SignalingPayload};
use crate::signaling::store::SignalingStore;

/// Сигнальный канал пары участников поверх документного хранилища.
/// Живёт столько же, сколько сессия звонка; конструируется владельцем
/// звонка вместе с ней.
pub struct SignalingChannel {
    store: Arc<dyn SignalingStore>,
    channel_id: String,
    local_id: String,
}

impl SignalingChannel {
    pub fn new(
        store: Arc<dyn SignalingStore>,
        local_id: impl Into<String>,
        remote_id: &str,
    ) -> Self {
        let local_id = local_id.into();
        let channel_id = channel_id(&local_id, remote_id);
        Self {
            store,
            channel_id,
            local_id,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Создаёт (или сбрасывает завершённый) документ канала
    pub async fn initialize(&self) -> CallResult<()> {
        self.store.create(&self.channel_id).await
    }

    /// Записывает сообщение от имени локального участника
    pub async fn send(&self, payload: SignalingPayload) -> CallResult<()> {
        let msg = SignalingMessage::new(&self.local_id, payload);
        debug!(channel_id = %self.channel_id, ts = msg.ts, "signaling send: {}", discriminant_name(&msg));
        self.store.apply(&self.channel_id, &msg).await
    }

    /// Живая подписка на сообщения канала. Сообщения восстанавливаются
    /// из diff-а последовательных снимков документа; начальный снимок
    /// проигрывается тоже — опоздавший подписчик всё равно увидит offer.
    /// Собственные сообщения (sender_id == local) не доставляются.
    pub async fn subscribe<F>(&self, on_message: F) -> CallResult<SignalingSubscription>
    where
        F: Fn(SignalingMessage) + Send + Sync + 'static,
    {
        // watch раньше read: изменение между ними придёт и в снимке, и в
        // очереди, diff сам уберёт дубль
        let mut rx = self.store.watch(&self.channel_id).await?;
        let initial = self.store.read(&self.channel_id).await?;

        let local_id = self.local_id.clone();
        let channel = self.channel_id.clone();
        let handle = tokio::spawn(async move {
            let mut prev = ChannelDocument::default();
            match initial {
                // документ завершённого звонка: его историю не
                // проигрываем, но учитываем как базу для diff-ов
                Some(doc) if doc.is_finished() => prev = doc,
                Some(doc) => deliver(&doc, &mut prev, &local_id, &on_message),
                None => {}
            }

            loop {
                match rx.recv().await {
                    Ok(doc) => deliver(&doc, &mut prev, &local_id, &on_message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // кандидаты append-only, следующий снимок догонит
                        warn!(channel_id = %channel, skipped, "signaling subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(SignalingSubscription {
            handle: Mutex::new(Some(handle)),
            cancelled: AtomicBool::new(false),
        })
    }
}

fn discriminant_name(msg: &SignalingMessage) -> &'static str {
    match msg.payload {
        SignalingPayload::Offer { .. } => "offer",
        SignalingPayload::Answer { .. } => "answer",
        SignalingPayload::Candidate { .. } => "candidate",
        SignalingPayload::Hangup => "hangup",
    }
}

fn deliver<F>(doc: &ChannelDocument, prev: &mut ChannelDocument, local_id: &str, on_message: &F)
where
    F: Fn(SignalingMessage),
{
    if doc.is_empty() {
        // документ сброшен под новый звонок: списки кандидатов пусты,
        // diff по длине должен начаться заново
        *prev = ChannelDocument::default();
        return;
    }

    let msgs = doc.diff_since(prev);
    if msgs.is_empty() {
        // пустой diff может означать устаревший снимок из очереди —
        // prev не откатываем
        return;
    }

    for msg in msgs {
        if msg.sender_id != local_id {
            on_message(msg);
        }
    }
    *prev = doc.clone();
}

/// Хэндл живой подписки; отмена идемпотентна и выполняется также при Drop
pub struct SignalingSubscription {
    handle: Mutex<Option<JoinHandle<()>>>,
    cancelled: AtomicBool,
}

impl SignalingSubscription {
    pub fn unsubscribe(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            if let Some(handle) = self.handle.lock().unwrap().take() {
                handle.abort();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for SignalingSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
