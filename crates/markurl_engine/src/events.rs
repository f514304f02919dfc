use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc};

use engine_logging::{engine_error, engine_warn};

use crate::ProgressEvent;

/// Plain event callback; the delivery path of last resort.
pub type EventCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("progress signal rejected event: {0}")]
pub struct SignalError(pub String);

/// Structured sink preferred over the plain callback when present.
pub trait ProgressSignal: Send + Sync {
    fn emit(&self, event: ProgressEvent) -> Result<(), SignalError>;
}

/// Forwards events into a channel; fails once the receiver is gone.
pub struct ChannelSignal {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSignal {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSignal for ChannelSignal {
    fn emit(&self, event: ProgressEvent) -> Result<(), SignalError> {
        self.tx
            .send(event)
            .map_err(|_| SignalError("receiver disconnected".to_string()))
    }
}

/// Delivers events to the signal, falling back to the callback. Never panics into the caller.
#[derive(Clone)]
pub struct EventDispatcher {
    signal: Option<Arc<dyn ProgressSignal>>,
    callback: EventCallback,
}

impl EventDispatcher {
    pub fn new(callback: EventCallback, signal: Option<Arc<dyn ProgressSignal>>) -> Self {
        Self { signal, callback }
    }

    pub fn silent() -> Self {
        Self::new(Arc::new(|_| {}), None)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(signal) = &self.signal {
            match catch_unwind(AssertUnwindSafe(|| signal.emit(event.clone()))) {
                Ok(Ok(())) => return,
                Ok(Err(err)) => engine_warn!("{err}; falling back to callback"),
                Err(_) => engine_warn!("progress signal panicked; falling back to callback"),
            }
        }
        let callback = &self.callback;
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            engine_error!("progress callback panicked; event dropped");
        }
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("has_signal", &self.signal.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventKind;
    use std::sync::Mutex;

    struct PanickingSignal;

    impl ProgressSignal for PanickingSignal {
        fn emit(&self, _event: ProgressEvent) -> Result<(), SignalError> {
            panic!("slot exploded");
        }
    }

    fn collecting() -> (EventCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: EventCallback = Arc::new(move |event| sink.lock().unwrap().push(event));
        (callback, seen)
    }

    #[test]
    fn signal_is_preferred_over_callback() {
        let (callback, seen) = collecting();
        let (tx, rx) = mpsc::channel();
        let dispatcher = EventDispatcher::new(callback, Some(Arc::new(ChannelSignal::new(tx))));

        dispatcher.emit(ProgressEvent::new(EventKind::Status).with_text("hello"));

        assert_eq!(rx.try_recv().unwrap().text.as_deref(), Some("hello"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_signals_fall_back_to_callback() {
        let (callback, seen) = collecting();
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let disconnected = EventDispatcher::new(callback.clone(), Some(Arc::new(ChannelSignal::new(tx))));
        let panicking = EventDispatcher::new(callback, Some(Arc::new(PanickingSignal)));

        disconnected.emit(ProgressEvent::new(EventKind::Detail));
        panicking.emit(ProgressEvent::new(EventKind::Error));

        let kinds: Vec<EventKind> = seen.lock().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Detail, EventKind::Error]);
    }

    #[test]
    fn panicking_callback_is_contained() {
        let dispatcher = EventDispatcher::new(Arc::new(|_| panic!("ui gone")), None);
        dispatcher.emit(ProgressEvent::new(EventKind::Status));
    }
}
