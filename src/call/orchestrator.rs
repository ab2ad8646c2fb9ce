use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::call::events::{CallEvent, EventBus, EventSubscription};
use crate::call::session::{CallSession, CallStatus};
use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::media::devices::MediaDevices;
use crate::media::stream::MediaConstraints;
use crate::peer::connection::RtcPeer;
use crate::peer::ice::PendingCandidates;
use crate::peer::types::{IceCandidate, PeerEvent};
use crate::signaling::channel::{SignalingChannel, SignalingSubscription};
use crate::signaling::message::{SignalingMessage, SignalingPayload};
use crate::signaling::store::SignalingStore;

/// Оркестратор одного звонка: маленький конечный автомат
/// idle → dialing/receiving → active → ended/error, который гоняют
/// действия пользователя и входящие сигнальные сообщения.
///
/// Все зависимости внедряются владельцем call-UI и живут ровно одну
/// сессию; после Ended/Error объект выбрасывается и для нового звонка
/// создаётся новый.
pub struct CallOrchestrator {
    session: CallSession,
    channel: SignalingChannel,
    devices: Arc<dyn MediaDevices>,
    config: CallConfig,
    constraints: MediaConstraints,
    events: Arc<EventBus>,
    peer: Mutex<Option<Arc<RtcPeer>>>,
    /// кандидаты собеседника, пришедшие раньше, чем создан peer
    early_candidates: PendingCandidates,
    subscription: Mutex<Option<SignalingSubscription>>,
    peer_events_tx: mpsc::UnboundedSender<PeerEvent>,
    peer_events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    started: AtomicBool,
    torn_down: AtomicBool,
}

impl CallOrchestrator {
    pub fn new(
        store: Arc<dyn SignalingStore>,
        devices: Arc<dyn MediaDevices>,
        config: CallConfig,
        local_user_id: impl Into<String>,
        remote_user_id: impl Into<String>,
        is_initiator: bool,
        constraints: MediaConstraints,
    ) -> Arc<Self> {
        let local_user_id = local_user_id.into();
        let remote_user_id = remote_user_id.into();
        let channel = SignalingChannel::new(store, local_user_id.clone(), &remote_user_id);
        let (peer_events_tx, peer_events_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            session: CallSession::new(local_user_id, remote_user_id, is_initiator),
            channel,
            devices,
            config,
            constraints,
            events: Arc::new(EventBus::new()),
            peer: Mutex::new(None),
            early_candidates: PendingCandidates::new(),
            subscription: Mutex::new(None),
            peer_events_tx,
            peer_events_rx: Mutex::new(Some(peer_events_rx)),
            started: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn status(&self) -> CallStatus {
        self.session.status()
    }

    /// Подписка на события звонка; слушатели вызываются синхронно
    pub fn subscribe(
        &self,
        listener: impl Fn(&CallEvent) + Send + Sync + 'static,
    ) -> EventSubscription {
        self.events.subscribe(listener)
    }

    /// Запускает сессию. Инициатор набирает собеседника; принимающая
    /// сторона начинает слушать канал и ждёт offer.
    pub async fn start(self: &Arc<Self>) -> CallResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CallError::invalid_state("start", self.status()));
        }

        if let Err(e) = self.spawn_signal_driver().await {
            self.fail(&e).await;
            return Err(e);
        }
        self.spawn_peer_driver();

        if self.session.is_initiator {
            if let Err(e) = self.dial().await {
                self.fail(&e).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// idle → dialing: медиа, соединение, offer
    async fn dial(self: &Arc<Self>) -> CallResult<()> {
        self.transition(CallStatus::Dialing, "user initiated call")?;
        self.channel.initialize().await?;

        let peer = self.build_peer().await?;
        let offer = peer.create_offer().await?;
        self.channel
            .send(SignalingPayload::Offer { sdp: offer })
            .await?;

        info!(
            session = %self.session.session_id,
            channel = %self.session.channel_id,
            "offer sent, dialing {}",
            self.session.remote_user_id
        );
        Ok(())
    }

    /// Принимает входящий звонок: remote description из записанного
    /// offer-а, затем answer. receiving → active.
    pub async fn accept(self: &Arc<Self>) -> CallResult<()> {
        let status = self.status();
        if status != CallStatus::Receiving {
            return Err(CallError::invalid_state("accept", status));
        }
        let (peer, offer) = {
            let peer = self.peer.lock().unwrap().clone();
            match (peer, self.session.take_offer()) {
                (Some(peer), Some(offer)) => (peer, offer),
                _ => return Err(CallError::invalid_state("accept", status)),
            }
        };

        let result: CallResult<()> = async {
            let answer = peer.accept_offer(offer).await?;
            self.channel
                .send(SignalingPayload::Answer { sdp: answer })
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                let _ = self.transition(CallStatus::Active, "call accepted");
                Ok(())
            }
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Отклоняет входящий звонок: hangup собеседнику и teardown
    pub async fn reject(self: &Arc<Self>) -> CallResult<()> {
        let status = self.status();
        if status != CallStatus::Receiving {
            return Err(CallError::invalid_state("reject", status));
        }
        self.send_hangup().await;
        self.finish("call rejected").await;
        Ok(())
    }

    /// Локальное завершение звонка из любого нетерминального состояния
    pub async fn hang_up(self: &Arc<Self>) -> CallResult<()> {
        let status = self.status();
        if status.is_terminal() {
            return Err(CallError::invalid_state("hang_up", status));
        }
        // из Idle звонок ещё не начинался, hangup собеседнику не нужен
        if status != CallStatus::Idle {
            self.send_hangup().await;
        }
        self.finish("local hangup").await;
        Ok(())
    }

    /// Mute/unmute микрофона; возвращает состояние дорожки после
    pub fn toggle_mute(&self) -> CallResult<bool> {
        match self.peer.lock().unwrap().as_ref() {
            Some(peer) => Ok(peer.toggle_mute()),
            None => Err(CallError::invalid_state("toggle_mute", self.status())),
        }
    }

    /// Включение/выключение камеры
    pub fn toggle_video(&self) -> CallResult<bool> {
        match self.peer.lock().unwrap().as_ref() {
            Some(peer) => Ok(peer.toggle_video()),
            None => Err(CallError::invalid_state("toggle_video", self.status())),
        }
    }

    /// Старт/стоп трансляции экрана; true — экран транслируется
    pub async fn toggle_screen_share(&self) -> CallResult<bool> {
        let peer = self.peer.lock().unwrap().clone();
        match peer {
            Some(peer) => peer.toggle_screen_share(&self.devices).await,
            None => Err(CallError::invalid_state("toggle_screen_share", self.status())),
        }
    }

    pub fn peer(&self) -> Option<Arc<RtcPeer>> {
        self.peer.lock().unwrap().clone()
    }

    /// ========== ДРАЙВЕРЫ ==========

    /// Подписка на сигнальный канал; сообщения обрабатываются строго
    /// последовательно одной задачей
    async fn spawn_signal_driver(self: &Arc<Self>) -> CallResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let sub = self
            .channel
            .subscribe(move |msg| {
                let _ = tx.send(msg);
            })
            .await?;
        *self.subscription.lock().unwrap() = Some(sub);

        let this = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if this.status().is_terminal() {
                    break;
                }
                this.handle_signal(msg).await;
            }
            debug!("signal driver finished");
        });
        Ok(())
    }

    fn spawn_peer_driver(self: &Arc<Self>) {
        let rx = self.peer_events_rx.lock().unwrap().take();
        let Some(mut rx) = rx else { return };

        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if this.status().is_terminal() {
                    break;
                }
                this.handle_peer_event(event).await;
            }
            debug!("peer driver finished");
        });
    }

    async fn handle_signal(self: &Arc<Self>, msg: SignalingMessage) {
        match msg.payload {
            SignalingPayload::Offer { sdp } => self.on_remote_offer(msg.sender_id, sdp).await,
            SignalingPayload::Answer { sdp } => self.on_remote_answer(sdp).await,
            SignalingPayload::Candidate { candidate } => self.on_remote_candidate(candidate).await,
            SignalingPayload::Hangup => self.on_remote_hangup().await,
        }
    }

    /// idle → receiving: медиа и соединение готовим сразу, answer не
    /// отправляется до явного accept-а
    async fn on_remote_offer(
        self: &Arc<Self>,
        from: String,
        sdp: webrtc::peer_connection::sdp::session_description::RTCSessionDescription,
    ) {
        if self.session.is_initiator || self.status() != CallStatus::Idle {
            debug!("ignoring offer in status {:?}", self.status());
            return;
        }
        if self.transition(CallStatus::Receiving, "inbound offer").is_err() {
            return;
        }
        self.session.record_offer(sdp);

        match self.build_peer().await {
            Ok(_) => self.events.emit(CallEvent::IncomingOffer { from }),
            Err(e) => self.fail(&e).await,
        }
    }

    async fn on_remote_answer(
        self: &Arc<Self>,
        sdp: webrtc::peer_connection::sdp::session_description::RTCSessionDescription,
    ) {
        if self.status() != CallStatus::Dialing {
            debug!("ignoring answer in status {:?}", self.status());
            return;
        }
        let peer = self.peer.lock().unwrap().clone();
        let Some(peer) = peer else { return };

        match peer.accept_answer(sdp).await {
            Ok(()) => {
                let _ = self.transition(CallStatus::Active, "answer received");
            }
            Err(e) => self.fail(&e).await,
        }
    }

    async fn on_remote_candidate(&self, candidate: IceCandidate) {
        let peer = self.peer.lock().unwrap().clone();
        match peer {
            Some(peer) => peer.add_remote_candidate(candidate).await,
            None => {
                // кандидат обогнал offer — придержим до создания peer
                debug!("candidate arrived before peer, queuing");
                self.early_candidates.push(candidate);
            }
        }
    }

    async fn on_remote_hangup(self: &Arc<Self>) {
        if self.status().is_terminal() {
            return;
        }
        info!(session = %self.session.session_id, "remote hangup received");
        // свой hangup в ответ не отправляем
        self.finish("remote hangup").await;
    }

    async fn handle_peer_event(self: &Arc<Self>, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Err(e) = self
                    .channel
                    .send(SignalingPayload::Candidate { candidate })
                    .await
                {
                    self.fail(&e).await;
                }
            }
            PeerEvent::RemoteStreamReady { stream_id } => {
                self.events.emit(CallEvent::RemoteStreamReady { stream_id });
            }
            PeerEvent::Connected => {
                // сигнальный answer обычно приходит раньше; connected —
                // подстраховка перехода в active
                if matches!(self.status(), CallStatus::Dialing | CallStatus::Receiving) {
                    let _ = self.transition(CallStatus::Active, "peer connected");
                }
            }
            PeerEvent::ConnectionProblem => self.events.emit(CallEvent::ConnectionProblem),
            PeerEvent::ConnectionRecovered => self.events.emit(CallEvent::ConnectionRecovered),
            PeerEvent::ConnectionLost => {
                if !self.status().is_terminal() {
                    info!(session = %self.session.session_id, "connection lost, ending call");
                    self.finish("connection lost").await;
                }
            }
        }
    }

    /// ========== ВНУТРЕННЕЕ ==========

    /// Захват устройств и создание peer-а; дорожки глушатся, если
    /// соединение создать не удалось
    async fn build_peer(&self) -> CallResult<Arc<RtcPeer>> {
        let stream = self.devices.acquire_user_media(self.constraints).await?;
        let tracks = stream.tracks();

        match RtcPeer::connect(&self.config, stream, self.peer_events_tx.clone()).await {
            Ok(peer) => {
                for candidate in self.early_candidates.take() {
                    peer.add_remote_candidate(candidate).await;
                }
                *self.peer.lock().unwrap() = Some(peer.clone());
                Ok(peer)
            }
            Err(e) => {
                for track in tracks {
                    track.stop();
                }
                Err(e)
            }
        }
    }

    fn transition(&self, to: CallStatus, reason: &'static str) -> CallResult<()> {
        match self.session.try_transition(to) {
            Some(from) => {
                info!(
                    session = %self.session.session_id,
                    ?from,
                    ?to,
                    reason,
                    "call status changed"
                );
                self.events.emit(CallEvent::StatusChanged { from, to });
                Ok(())
            }
            None => Err(CallError::invalid_state(reason, self.status())),
        }
    }

    async fn send_hangup(&self) {
        if let Err(e) = self.channel.send(SignalingPayload::Hangup).await {
            // звонок всё равно завершается локально
            warn!("failed to send hangup: {e}");
        }
    }

    /// Ошибка на границе оркестратора: пользователю — сообщение,
    /// сессии — Error и затем Ended. Ничего не ретраим.
    async fn fail(self: &Arc<Self>, error: &CallError) {
        if self.status().is_terminal() {
            return;
        }
        warn!(session = %self.session.session_id, "call failed: {error}");
        if error.is_user_facing() {
            self.events.emit(CallEvent::Error {
                message: error.to_string(),
            });
        }
        let _ = self.transition(CallStatus::Error, "unrecoverable error");
        self.finish("error").await;
    }

    async fn finish(self: &Arc<Self>, reason: &'static str) {
        let _ = self.transition(CallStatus::Ended, reason);
        self.teardown().await;
    }

    /// Канонический порядок освобождения: (а) отписка от сигнального
    /// канала, (б) остановка локальных дорожек, (в) закрытие
    /// peer-соединения. Идемпотентно, общий путь всех терминальных
    /// переходов — явного hangup, hangup собеседника и ошибок.
    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(sub) = self.subscription.lock().unwrap().take() {
            sub.unsubscribe();
        }

        let peer = self.peer.lock().unwrap().take();
        if let Some(peer) = peer {
            peer.local_stream().stop_all();
            peer.close().await;
        }

        // будим peer-драйвер: он увидит терминальный статус и выйдет,
        // даже если peer так и не был создан
        let _ = self.peer_events_tx.send(PeerEvent::ConnectionLost);

        debug!(session = %self.session.session_id, "call session torn down");
    }
}
