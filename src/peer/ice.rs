use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;

/// Кандидаты, полученные до установки remote description.
/// Сигнальный стор не гарантирует порядок: кандидат может прийти
/// раньше offer/answer, к которому относится — копим и применяем
/// после установки описания.
#[derive(Default)]
pub struct PendingCandidates {
    queue: Mutex<Vec<IceCandidate>>,
}

impl PendingCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, candidate: IceCandidate) {
        let mut queue = self.queue.lock().unwrap();
        queue.push(candidate);
        debug!(total = queue.len(), "queued remote candidate");
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    pub fn take(&self) -> Vec<IceCandidate> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    /// Применяет все отложенные кандидаты после установки remote description
    pub async fn drain_into(&self, pc: &RTCPeerConnection) {
        for candidate in self.take() {
            debug!("applying pending candidate: {:?}", candidate);
            if let Err(e) = pc.add_ice_candidate(to_init(candidate)).await {
                warn!("failed to apply pending candidate: {:?}", e);
            }
        }
    }
}

pub fn to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: None,
    }
}

/// Разбивка локальных кандидатов по типу
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateBreakdown {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateBreakdown {
    let mut breakdown = CandidateBreakdown::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            breakdown.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            breakdown.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            breakdown.relay += 1;
        }
    }

    debug!(
        "candidate breakdown: {} host, {} srflx, {} relay",
        breakdown.host, breakdown.srflx, breakdown.relay
    );

    if breakdown.relay == 0 {
        warn!("no TURN relay candidates; connection through symmetric NAT may fail");
    }

    breakdown
}

/// Проверка доступности ICE сервера из настроек пользователя.
/// Поднимаем одноразовое соединение только с проверяемым сервером и
/// ждём кандидата нужного типа: srflx для STUN, relay для TURN.
pub async fn check_ice_server_availability(server: &ServerConfig, probe_timeout: Duration) -> bool {
    let url = add_ice_url_scheme(server);
    debug!(%url, kind = %server.kind, "probing ice server");

    let ice_server = RTCIceServer {
        urls: vec![url],
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
    };

    let api = APIBuilder::new().build();
    let pc = match api
        .new_peer_connection(RTCConfiguration {
            ice_servers: vec![ice_server],
            ..Default::default()
        })
        .await
    {
        Ok(pc) => pc,
        Err(e) => {
            warn!("probe peer connection failed: {:?}", e);
            return false;
        }
    };

    let (candidate_tx, mut candidate_rx) = mpsc::channel(10);
    let expect_relay = server.kind == "turn";
    pc.on_ice_candidate(Box::new(move |candidate| {
        let tx = candidate_tx.clone();
        Box::pin(async move {
            if let Some(c) = candidate {
                if let Ok(init) = c.to_json() {
                    let matched = if expect_relay {
                        init.candidate.contains("relay")
                    } else {
                        init.candidate.contains("srflx")
                    };
                    if matched {
                        let _ = tx.send(true).await;
                    }
                }
            }
        })
    }));

    let (gather_tx, mut gather_rx) = mpsc::channel(10);
    pc.on_ice_gathering_state_change(Box::new(move |state| {
        let tx = gather_tx.clone();
        Box::pin(async move {
            if state == RTCIceGathererState::Complete {
                let _ = tx.send(()).await;
            }
        })
    }));

    // data channel + offer запускают сбор кандидатов
    if pc
        .create_data_channel("probe", Some(RTCDataChannelInit::default()))
        .await
        .is_err()
    {
        let _ = pc.close().await;
        return false;
    }
    let offer = match pc.create_offer(None).await {
        Ok(offer) => offer,
        Err(_) => {
            let _ = pc.close().await;
            return false;
        }
    };
    if pc.set_local_description(offer).await.is_err() {
        let _ = pc.close().await;
        return false;
    }

    let reachable = tokio::select! {
        matched = timeout(probe_timeout, candidate_rx.recv()) => {
            matches!(matched, Ok(Some(true)))
        }
        // сбор завершился без нужного кандидата
        _ = gather_rx.recv() => false,
    };

    let _ = pc.close().await;
    debug!(reachable, "ice server probe finished");
    reachable
}
