use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::debug;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::CallResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Запрошенные устройства локального участника
#[derive(Debug, Clone, Copy)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Локальная дорожка: sample-трек для peer-соединения плюс флаги
/// enabled/stopped. Mute — это выключенный флаг, дорожка остаётся
/// прикреплённой и renegotiation не нужен; источник захвата обязан
/// не писать сэмплы, пока флаг снят.
#[derive(Debug)]
pub struct LocalTrack {
    rtp: Arc<TrackLocalStaticSample>,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    ended_tx: watch::Sender<bool>,
}

impl LocalTrack {
    pub fn new(rtp: Arc<TrackLocalStaticSample>, kind: TrackKind) -> Self {
        let (ended_tx, _) = watch::channel(false);
        Self {
            rtp,
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            ended_tx,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn id(&self) -> String {
        self.rtp.id().to_string()
    }

    /// Внутренний трек для add_track/replace_track
    pub fn rtp(&self) -> Arc<TrackLocalStaticSample> {
        self.rtp.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
    }

    /// Переключает флаг, возвращает новое состояние
    pub fn toggle(&self) -> bool {
        let was = self.enabled.fetch_xor(true, Ordering::SeqCst);
        !was
    }

    /// Останавливает дорожку; идемпотентно. Уведомляет наблюдателей
    /// ended-канала (захват экрана восстанавливает камеру по нему же).
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(track = %self.id(), "local track stopped");
            // send_replace: значение фиксируется даже без живых подписчиков
            self.ended_tx.send_replace(true);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// true, пока источнику можно писать сэмплы
    pub fn should_capture(&self) -> bool {
        !self.is_stopped() && self.is_enabled()
    }

    /// Канал завершения дорожки: true после stop() или окончания захвата
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.ended_tx.subscribe()
    }

    /// Пишет сэмпл источника захвата. Пока дорожка выключена или
    /// остановлена — сэмплы молча отбрасываются, это и есть mute.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> CallResult<()> {
        if !self.should_capture() {
            return Ok(());
        }
        self.rtp
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

/// Локальный стрим: максимум одна аудио и одна видео дорожка
#[derive(Debug)]
pub struct LocalStream {
    audio: Option<Arc<LocalTrack>>,
    video: Option<Arc<LocalTrack>>,
}

impl LocalStream {
    pub fn new(audio: Option<Arc<LocalTrack>>, video: Option<Arc<LocalTrack>>) -> Self {
        Self { audio, video }
    }

    pub fn audio(&self) -> Option<&Arc<LocalTrack>> {
        self.audio.as_ref()
    }

    pub fn video(&self) -> Option<&Arc<LocalTrack>> {
        self.video.as_ref()
    }

    pub fn tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.audio
            .iter()
            .chain(self.video.iter())
            .cloned()
            .collect()
    }

    /// Mute/unmute микрофона; None, если аудио дорожки нет
    pub fn toggle_audio(&self) -> Option<bool> {
        self.audio.as_ref().map(|t| t.toggle())
    }

    /// Включение/выключение камеры; None, если видео дорожки нет
    pub fn toggle_video(&self) -> Option<bool> {
        self.video.as_ref().map(|t| t.toggle())
    }

    pub fn stop_all(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

/// Удалённый стрим, наполняется из on_track
#[derive(Default)]
pub struct RemoteStream {
    tracks: Mutex<Vec<Arc<TrackRemote>>>,
}

impl RemoteStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, track: Arc<TrackRemote>) {
        self.tracks.lock().unwrap().push(track);
    }

    pub fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.lock().unwrap().is_empty()
    }
}
