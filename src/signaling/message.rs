use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::peer::types::IceCandidate;

/// Детерминированный id канала: оба участника должны вычислить одно и
/// то же имя документа без координации, поэтому id пары сортируются.
pub fn channel_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}_{hi}")
}

/// Слот offer/answer: один на канал, перезаписывается целиком
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DescriptionSlot {
    pub sdp: RTCSessionDescription,
    pub sender_id: String,
    pub ts: i64,
}

/// Кандидат в per-sender списке документа
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CandidateSlot {
    pub candidate: IceCandidate,
    pub ts: i64,
}

/// Слот hangup
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HangupSlot {
    pub sender_id: String,
    pub ts: i64,
}

/// Общий документ канала — единственный ресурс, разделяемый двумя
/// сторонами звонка. Кандидаты append-only по отправителю,
/// offer/answer/hangup перезаписываются по одному слоту на тип.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChannelDocument {
    pub offer: Option<DescriptionSlot>,
    pub answer: Option<DescriptionSlot>,
    #[serde(default)]
    pub candidates: BTreeMap<String, Vec<CandidateSlot>>,
    pub hangup: Option<HangupSlot>,
    pub created_at: i64,
}

/// Полезная нагрузка сигнального сообщения; вариант определяется
/// тегом `type` и матчится исчерпывающе
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingPayload {
    Offer { sdp: RTCSessionDescription },
    Answer { sdp: RTCSessionDescription },
    Candidate { candidate: IceCandidate },
    Hangup,
}

/// Сигнальное сообщение между двумя участниками канала
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignalingMessage {
    pub sender_id: String,
    pub ts: i64,
    #[serde(flatten)]
    pub payload: SignalingPayload,
}

impl SignalingMessage {
    pub fn new(sender_id: impl Into<String>, payload: SignalingPayload) -> Self {
        Self {
            sender_id: sender_id.into(),
            ts: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }
}

impl ChannelDocument {
    pub fn new(created_at: i64) -> Self {
        Self {
            created_at,
            ..Default::default()
        }
    }

    /// Документ завершённого звонка: можно сбросить при новой инициализации
    pub fn is_finished(&self) -> bool {
        self.hangup.is_some()
    }

    /// Документ без сигнального состояния
    pub fn is_empty(&self) -> bool {
        self.offer.is_none()
            && self.answer.is_none()
            && self.hangup.is_none()
            && self.candidates.values().all(|list| list.is_empty())
    }

    /// Merge-семантика записи: кандидаты добавляются в список своего
    /// отправителя, остальные типы перезаписывают свой слот
    pub fn apply(&mut self, msg: &SignalingMessage) {
        match &msg.payload {
            SignalingPayload::Offer { sdp } => {
                self.offer = Some(DescriptionSlot {
                    sdp: sdp.clone(),
                    sender_id: msg.sender_id.clone(),
                    ts: msg.ts,
                });
            }
            SignalingPayload::Answer { sdp } => {
                self.answer = Some(DescriptionSlot {
                    sdp: sdp.clone(),
                    sender_id: msg.sender_id.clone(),
                    ts: msg.ts,
                });
            }
            SignalingPayload::Candidate { candidate } => {
                self.candidates
                    .entry(msg.sender_id.clone())
                    .or_default()
                    .push(CandidateSlot {
                        candidate: candidate.clone(),
                        ts: msg.ts,
                    });
            }
            SignalingPayload::Hangup => {
                self.hangup = Some(HangupSlot {
                    sender_id: msg.sender_id.clone(),
                    ts: msg.ts,
                });
            }
        }
    }

    /// Восстанавливает сообщения из изменений между двумя снимками
    /// документа. Пропущенные промежуточные снимки не теряют кандидатов:
    /// списки append-only, сравнение идёт по длине.
    pub fn diff_since(&self, prev: &ChannelDocument) -> Vec<SignalingMessage> {
        let mut out = Vec::new();

        if let Some(offer) = &self.offer {
            if prev.offer.as_ref().map(|p| p.ts) != Some(offer.ts) {
                out.push(SignalingMessage {
                    sender_id: offer.sender_id.clone(),
                    ts: offer.ts,
                    payload: SignalingPayload::Offer {
                        sdp: offer.sdp.clone(),
                    },
                });
            }
        }

        if let Some(answer) = &self.answer {
            if prev.answer.as_ref().map(|p| p.ts) != Some(answer.ts) {
                out.push(SignalingMessage {
                    sender_id: answer.sender_id.clone(),
                    ts: answer.ts,
                    payload: SignalingPayload::Answer {
                        sdp: answer.sdp.clone(),
                    },
                });
            }
        }

        for (sender_id, list) in &self.candidates {
            let seen = prev.candidates.get(sender_id).map_or(0, |l| l.len());
            for slot in list.iter().skip(seen) {
                out.push(SignalingMessage {
                    sender_id: sender_id.clone(),
                    ts: slot.ts,
                    payload: SignalingPayload::Candidate {
                        candidate: slot.candidate.clone(),
                    },
                });
            }
        }

        if let Some(hangup) = &self.hangup {
            if prev.hangup.as_ref().map(|p| p.ts) != Some(hangup.ts) {
                out.push(SignalingMessage {
                    sender_id: hangup.sender_id.clone(),
                    ts: hangup.ts,
                    payload: SignalingPayload::Hangup,
                });
            }
        }

        out
    }
}
