use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{CallError, CallResult};
use crate::media::stream::{LocalStream, LocalTrack, MediaConstraints, TrackKind};
use crate::utils::random_id;

/// Порт до платформенного захвата устройств (аналог
/// getUserMedia/getDisplayMedia). Реализацию поставляет хост
/// приложения; отказ в доступе — это MediaAccess, пользователю
/// показывается сообщение, автоматических повторов нет.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Камера и/или микрофон по constraints
    async fn acquire_user_media(&self, constraints: MediaConstraints) -> CallResult<LocalStream>;

    /// Дорожка захвата экрана
    async fn acquire_display_media(&self) -> CallResult<Arc<LocalTrack>>;
}

fn opus_track(id: String, stream_id: String) -> Arc<LocalTrack> {
    let rtp = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        id,
        stream_id,
    ));
    Arc::new(LocalTrack::new(rtp, TrackKind::Audio))
}

fn vp8_track(id: String, stream_id: String) -> Arc<LocalTrack> {
    let rtp = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            ..Default::default()
        },
        id,
        stream_id,
    ));
    Arc::new(LocalTrack::new(rtp, TrackKind::Video))
}

/// Синтетические устройства: дорожки без реального захвата.
/// Используются в тестах и локальной разработке; `denied()` имитирует
/// отказ пользователя в доступе к устройствам.
pub struct SyntheticMediaDevices {
    deny_user_media: bool,
    deny_display: bool,
}

impl SyntheticMediaDevices {
    pub fn new() -> Self {
        Self {
            deny_user_media: false,
            deny_display: false,
        }
    }

    pub fn denied() -> Self {
        Self {
            deny_user_media: true,
            deny_display: true,
        }
    }

    pub fn display_denied() -> Self {
        Self {
            deny_user_media: false,
            deny_display: true,
        }
    }
}

impl Default for SyntheticMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SyntheticMediaDevices {
    async fn acquire_user_media(&self, constraints: MediaConstraints) -> CallResult<LocalStream> {
        if self.deny_user_media {
            return Err(CallError::media_access("permission denied"));
        }
        if !constraints.audio && !constraints.video {
            return Err(CallError::media_access("no devices requested"));
        }

        // обе дорожки получают общий stream id — удалённая сторона
        // увидит их как один стрим
        let stream_id = format!("hw-{}", random_id());
        let audio = constraints
            .audio
            .then(|| opus_track(format!("mic-{}", random_id()), stream_id.clone()));
        let video = constraints
            .video
            .then(|| vp8_track(format!("cam-{}", random_id()), stream_id.clone()));

        debug!(%stream_id, audio = constraints.audio, video = constraints.video, "user media acquired");
        Ok(LocalStream::new(audio, video))
    }

    async fn acquire_display_media(&self) -> CallResult<Arc<LocalTrack>> {
        if self.deny_display {
            return Err(CallError::media_access("screen capture denied"));
        }
        let stream_id = format!("hw-screen-{}", random_id());
        Ok(vp8_track(format!("screen-{}", random_id()), stream_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_denied_devices_surface_media_access_error() {
        let devices = SyntheticMediaDevices::denied();
        let err = devices
            .acquire_user_media(MediaConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::MediaAccess(_)));

        let err = devices.acquire_display_media().await.unwrap_err();
        assert!(matches!(err, CallError::MediaAccess(_)));
    }

    #[tokio::test]
    async fn test_constraints_control_acquired_tracks() {
        let devices = SyntheticMediaDevices::new();
        let stream = devices
            .acquire_user_media(MediaConstraints {
                audio: true,
                video: false,
            })
            .await
            .unwrap();

        assert!(stream.audio().is_some());
        assert!(stream.video().is_none());
        assert_eq!(stream.tracks().len(), 1);
    }
}
