use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::call::session::CallStatus;

/// Событие звонка для UI-подписчиков
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Смена статуса сессии
    StatusChanged { from: CallStatus, to: CallStatus },
    /// Входящий звонок: offer получен, ждём accept/reject
    IncomingOffer { from: String },
    /// Удалённый стрим получил первую дорожку
    RemoteStreamReady { stream_id: String },
    /// Соединение просело, идёт grace-период
    ConnectionProblem,
    /// Соединение восстановилось
    ConnectionRecovered,
    /// Ошибка для показа пользователю (toast)
    Error { message: String },
}

type Listener = Arc<dyn Fn(&CallEvent) + Send + Sync>;

/// Явная шина подписчиков вместо скрытых глобальных emit-ов:
/// subscribe → unsubscribe, слушатели вызываются синхронно при
/// каждом событии.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&CallEvent) + Send + Sync + 'static,
    ) -> EventSubscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));
        EventSubscription {
            bus: Arc::downgrade(self),
            id,
            active: AtomicBool::new(true),
        }
    }

    pub fn emit(&self, event: CallEvent) {
        debug!("call event: {:?}", event);
        // слушателей клонируем наружу: колбэк может отписаться прямо
        // из обработчика
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    fn remove(&self, id: u64) {
        self.listeners.lock().unwrap().retain(|(lid, _)| *lid != id);
    }
}

/// Хэндл подписки; отмена идемпотентна, Drop отписывает сам
pub struct EventSubscription {
    bus: Weak<EventBus>,
    id: u64,
    active: AtomicBool,
}

impl EventSubscription {
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(bus: &Arc<EventBus>) -> (Arc<Mutex<Vec<CallEvent>>>, EventSubscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        (seen, sub)
    }

    #[test]
    fn test_listeners_called_synchronously() {
        let bus = Arc::new(EventBus::new());
        let (first, _sub1) = counter(&bus);
        let (second, _sub2) = counter(&bus);

        bus.emit(CallEvent::ConnectionProblem);

        assert_eq!(first.lock().unwrap().len(), 1);
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_is_idempotent() {
        let bus = Arc::new(EventBus::new());
        let (seen, sub) = counter(&bus);

        bus.emit(CallEvent::ConnectionProblem);
        sub.unsubscribe();
        sub.unsubscribe();
        bus.emit(CallEvent::ConnectionRecovered);

        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
