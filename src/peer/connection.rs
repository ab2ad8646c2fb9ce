use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::media::devices::MediaDevices;
use crate::media::stream::{LocalStream, LocalTrack, RemoteStream, TrackKind};
use crate::peer::ice::{to_init, PendingCandidates};
use crate::peer::types::{IceCandidate, PeerEvent, ServerConfig};
use crate::utils::add_ice_url_scheme;

/// Владелец peer-соединения и медиа одной сессии звонка: локальный
/// стрим, удалённый стрим, буфер ранних кандидатов. Создаётся на
/// звонок, закрывается и выбрасывается при его завершении.
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    local: LocalStream,
    remote: Arc<RemoteStream>,
    pending: PendingCandidates,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
    screen: Mutex<Option<Arc<LocalTrack>>>,
    screen_watch: Mutex<Option<JoinHandle<()>>>,
    grace: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RtcPeer {
    /// Создаёт соединение, прикрепляет дорожки локального стрима и
    /// вешает обработчики. Дорожки добавляются до создания
    /// offer/answer. События уходят оркестратору через канал.
    pub async fn connect(
        config: &CallConfig,
        local: LocalStream,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> CallResult<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(&config.ice_servers))
                .await?,
        );

        // Локальные кандидаты сразу уходят собеседнику (trickle)
        let ev = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let ev = ev.clone();
            Box::pin(async move {
                match candidate {
                    Some(c) => {
                        if let Ok(init) = c.to_json() {
                            debug!(
                                "trickle LOCAL: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
                                init.candidate, init.sdp_mid, init.sdp_mline_index
                            );
                            let _ = ev.send(PeerEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            }));
                        }
                    }
                    // None означает конец сбора
                    None => debug!("ice candidate gathering completed"),
                }
            })
        }));

        let remote = Arc::new(RemoteStream::new());
        let announced: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let remote_cb = remote.clone();
        let announced_cb = announced.clone();
        let ev = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let remote = remote_cb.clone();
                let announced = announced_cb.clone();
                let ev = ev.clone();
                Box::pin(async move {
                    let stream_id = track.stream_id();
                    debug!(track = %track.id(), stream = %stream_id, "remote track received");
                    remote.add(track);
                    // ready-событие ровно один раз на стрим
                    if announced.lock().unwrap().insert(stream_id.clone()) {
                        let _ = ev.send(PeerEvent::RemoteStreamReady { stream_id });
                    }
                })
            },
        ));

        let grace: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));
        let grace_cb = grace.clone();
        let grace_period = config.grace_period;
        let pc_state = pc.clone();
        let ev = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!("peer connection state changed to: {:?}", st);
            let ev = ev.clone();

            match st {
                RTCPeerConnectionState::Connected => {
                    // отменяем отложенный разрыв, если он был
                    if let Some(handle) = grace_cb.lock().unwrap().take() {
                        handle.abort();
                        let _ = ev.send(PeerEvent::ConnectionRecovered);
                    }
                    let _ = ev.send(PeerEvent::Connected);
                }

                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                    let mut guard = grace_cb.lock().unwrap();
                    if guard.is_some() {
                        debug!("grace period already pending, ignoring");
                    } else {
                        let _ = ev.send(PeerEvent::ConnectionProblem);
                        let pc = pc_state.clone();
                        let ev = ev.clone();
                        *guard = Some(tokio::spawn(async move {
                            debug!("grace period started, waiting {:?}", grace_period);
                            sleep(grace_period).await;

                            if pc.connection_state() != RTCPeerConnectionState::Connected {
                                info!("grace period lapsed, connection lost");
                                let _ = ev.send(PeerEvent::ConnectionLost);
                            } else {
                                debug!("connection recovered during grace period");
                            }
                        }));
                    }
                }

                RTCPeerConnectionState::Closed => {
                    if let Some(handle) = grace_cb.lock().unwrap().take() {
                        handle.abort();
                    }
                    let _ = ev.send(PeerEvent::ConnectionLost);
                }

                _ => {}
            }
            Box::pin(async {})
        }));

        // дорожки до offer/answer
        let mut video_sender = None;
        for track in local.tracks() {
            let sender = pc
                .add_track(track.rtp() as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            if track.kind() == TrackKind::Video {
                video_sender = Some(sender);
            }
        }

        Ok(Arc::new(Self {
            pc,
            local,
            remote,
            pending: PendingCandidates::new(),
            video_sender: Mutex::new(video_sender),
            screen: Mutex::new(None),
            screen_watch: Mutex::new(None),
            grace,
        }))
    }

    /// Генерирует offer и ставит его локальным описанием. Окончания
    /// сбора кандидатов не ждём — они уходят trickle-ом.
    pub async fn create_offer(&self) -> CallResult<RTCSessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;
        self.pc
            .local_description()
            .await
            .ok_or_else(|| CallError::negotiation("local description missing after offer"))
    }

    /// Принимает offer собеседника и генерирует answer
    pub async fn accept_offer(
        &self,
        offer: RTCSessionDescription,
    ) -> CallResult<RTCSessionDescription> {
        self.pc.set_remote_description(offer).await?;
        self.pending.drain_into(&self.pc).await;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer).await?;
        self.pc
            .local_description()
            .await
            .ok_or_else(|| CallError::negotiation("local description missing after answer"))
    }

    /// Принимает answer собеседника
    pub async fn accept_answer(&self, answer: RTCSessionDescription) -> CallResult<()> {
        self.pc.set_remote_description(answer).await?;
        self.pending.drain_into(&self.pc).await;
        Ok(())
    }

    /// Применяет кандидат собеседника; до установки remote description
    /// кандидаты копятся в буфере
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) {
        if self.pc.remote_description().await.is_some() {
            if let Err(e) = self.pc.add_ice_candidate(to_init(candidate)).await {
                warn!("failed to add ICE candidate: {:?}", e);
            }
        } else {
            debug!("remote description not set yet, queuing candidate");
            self.pending.push(candidate);
        }
    }

    /// Mute/unmute микрофона; renegotiation не нужен, дорожка остаётся
    /// прикреплённой. Возвращает состояние enabled после переключения.
    pub fn toggle_mute(&self) -> bool {
        let enabled = self.local.toggle_audio().unwrap_or_else(|| {
            warn!("toggle_mute called without audio track");
            false
        });
        debug!(enabled, "audio track toggled");
        enabled
    }

    /// Включение/выключение камеры, семантика как у toggle_mute
    pub fn toggle_video(&self) -> bool {
        let enabled = self.local.toggle_video().unwrap_or_else(|| {
            warn!("toggle_video called without video track");
            false
        });
        debug!(enabled, "video track toggled");
        enabled
    }

    /// Включает/выключает трансляцию экрана. Исходящая видео дорожка
    /// подменяется через replace_track без renegotiation. Камера
    /// возвращается одним и тем же путём и при ручном выключении, и
    /// когда захват завершился сам (пользователь закрыл окно шаринга).
    /// Возвращает true, если после вызова транслируется экран.
    pub async fn toggle_screen_share(
        self: &Arc<Self>,
        devices: &Arc<dyn MediaDevices>,
    ) -> CallResult<bool> {
        if self.screen.lock().unwrap().is_some() {
            self.stop_screen_share().await;
            return Ok(false);
        }

        let sender = self.video_sender.lock().unwrap().clone();
        let Some(sender) = sender else {
            return Err(CallError::media_access(
                "no outgoing video track to replace",
            ));
        };

        let screen = devices.acquire_display_media().await?;
        sender
            .replace_track(Some(screen.rtp() as Arc<dyn TrackLocal + Send + Sync>))
            .await?;
        info!(track = %screen.id(), "screen share started");

        let mut ended = screen.ended();
        *self.screen.lock().unwrap() = Some(screen);

        // слабая ссылка: наблюдатель не должен удерживать сессию
        let this = Arc::downgrade(self);
        let watch = tokio::spawn(async move {
            while ended.changed().await.is_ok() {
                if *ended.borrow() {
                    if let Some(peer) = this.upgrade() {
                        peer.stop_screen_share().await;
                    }
                    break;
                }
            }
        });
        *self.screen_watch.lock().unwrap() = Some(watch);

        Ok(true)
    }

    /// Останавливает шаринг и возвращает камеру; идемпотентно —
    /// слот экрана забирает ровно один из путей выключения
    pub async fn stop_screen_share(&self) {
        let screen = self.screen.lock().unwrap().take();
        let Some(screen) = screen else { return };
        screen.stop();

        let sender = self.video_sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            let camera = self
                .local
                .video()
                .map(|t| t.rtp() as Arc<dyn TrackLocal + Send + Sync>);
            if let Err(e) = sender.replace_track(camera).await {
                warn!("failed to restore camera track: {:?}", e);
            }
        }
        info!("screen share stopped, camera track restored");
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.lock().unwrap().is_some()
    }

    /// id дорожки, уходящей в видео sender (камера или экран)
    pub async fn outgoing_video_track_id(&self) -> Option<String> {
        let sender = self.video_sender.lock().unwrap().clone()?;
        sender.track().await.map(|t| t.id().to_string())
    }

    pub fn local_stream(&self) -> &LocalStream {
        &self.local
    }

    pub fn remote_stream(&self) -> Arc<RemoteStream> {
        self.remote.clone()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    /// Закрывает соединение. Вызывается из teardown-а оркестратора,
    /// никогда из обработчиков самого соединения (close изнутри
    /// колбэка взводит Closed-колбэк и зависает на его ожидании).
    pub async fn close(&self) {
        if let Some(handle) = self.grace.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.screen_watch.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(screen) = self.screen.lock().unwrap().take() {
            screen.stop();
        }

        if let Err(e) = self.pc.close().await {
            warn!("peer connection close failed: {:?}", e);
        }
    }
}

/// Конфигурация RTC из списка ICE серверов звонка
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let ice_servers = servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::devices::{MediaDevices, SyntheticMediaDevices};
    use crate::media::stream::MediaConstraints;
    use std::time::Duration;

    fn offline_config() -> CallConfig {
        CallConfig {
            ice_servers: Vec::new(),
            ..Default::default()
        }
    }

    async fn peer() -> (Arc<RtcPeer>, mpsc::UnboundedReceiver<PeerEvent>) {
        let devices = SyntheticMediaDevices::new();
        let stream = devices
            .acquire_user_media(MediaConstraints::default())
            .await
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = RtcPeer::connect(&offline_config(), stream, tx).await.unwrap();
        (peer, rx)
    }

    #[tokio::test]
    async fn test_offer_answer_roundtrip() {
        let (alice, _arx) = peer().await;
        let (bob, _brx) = peer().await;

        let offer = alice.create_offer().await.unwrap();
        let answer = bob.accept_offer(offer).await.unwrap();
        alice.accept_answer(answer).await.unwrap();

        alice.close().await;
        bob.close().await;
    }

    #[tokio::test]
    async fn test_candidates_buffered_until_remote_description() {
        let (alice, _arx) = peer().await;
        let (bob, _brx) = peer().await;

        bob.add_remote_candidate(IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.168.0.1 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        })
        .await;
        assert_eq!(bob.pending_candidates(), 1);

        let offer = alice.create_offer().await.unwrap();
        let _answer = bob.accept_offer(offer).await.unwrap();
        // буфер опустошён после установки remote description
        assert_eq!(bob.pending_candidates(), 0);

        alice.close().await;
        bob.close().await;
    }

    #[tokio::test]
    async fn test_mute_toggle_pair_restores_state() {
        let (alice, _arx) = peer().await;

        let audio = alice.local_stream().audio().unwrap().clone();
        assert!(audio.is_enabled());

        assert!(!alice.toggle_mute());
        assert!(alice.toggle_mute());
        assert!(audio.is_enabled());

        alice.close().await;
    }

    #[tokio::test]
    async fn test_screen_share_double_toggle_restores_camera() {
        let (alice, _arx) = peer().await;
        let devices: Arc<dyn MediaDevices> = Arc::new(SyntheticMediaDevices::new());

        let camera_id = alice.local_stream().video().unwrap().id();
        assert_eq!(
            alice.outgoing_video_track_id().await,
            Some(camera_id.clone())
        );

        assert!(alice.toggle_screen_share(&devices).await.unwrap());
        assert!(alice.is_screen_sharing());
        let shared_id = alice.outgoing_video_track_id().await.unwrap();
        assert_ne!(shared_id, camera_id);

        assert!(!alice.toggle_screen_share(&devices).await.unwrap());
        assert!(!alice.is_screen_sharing());
        assert_eq!(alice.outgoing_video_track_id().await, Some(camera_id));

        alice.close().await;
    }

    #[tokio::test]
    async fn test_screen_capture_ending_restores_camera() {
        let (alice, _arx) = peer().await;
        let devices: Arc<dyn MediaDevices> = Arc::new(SyntheticMediaDevices::new());

        let camera_id = alice.local_stream().video().unwrap().id();
        alice.toggle_screen_share(&devices).await.unwrap();

        // пользователь закрыл расшаренное окно: дорожка завершилась сама
        let screen = alice.screen.lock().unwrap().clone().unwrap();
        screen.stop();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!alice.is_screen_sharing());
        assert_eq!(alice.outgoing_video_track_id().await, Some(camera_id));

        alice.close().await;
    }

    #[tokio::test]
    async fn test_screen_share_denied_leaves_camera() {
        let (alice, _arx) = peer().await;
        let devices: Arc<dyn MediaDevices> = Arc::new(SyntheticMediaDevices::display_denied());

        let camera_id = alice.local_stream().video().unwrap().id();
        let err = alice.toggle_screen_share(&devices).await.unwrap_err();
        assert!(matches!(err, CallError::MediaAccess(_)));
        assert!(!alice.is_screen_sharing());
        assert_eq!(alice.outgoing_video_track_id().await, Some(camera_id));

        alice.close().await;
    }
}
