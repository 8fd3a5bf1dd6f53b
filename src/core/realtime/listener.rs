//! Ordered delivery of listener notifications.
//!
//! Transport callbacks, the negotiation pipeline and caller-initiated
//! teardown all produce notifications. They are funnelled through one
//! dispatcher task per connection attempt so the listener sees them in
//! order and never concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use super::base::SharedListener;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ListenerEvent {
    Connected,
    Disconnected,
    SpeakingStarted,
    SpeakingStopped,
    AudioReceived,
    Error(String),
}

/// Sending half of a per-attempt dispatcher.
///
/// `Disconnected` is forwarded at most once per notifier, which is what
/// gives the "exactly once per connect call" guarantee.
#[derive(Clone)]
pub(crate) struct ListenerNotifier {
    tx: mpsc::UnboundedSender<ListenerEvent>,
    disconnected: Arc<AtomicBool>,
}

impl ListenerNotifier {
    /// Spawn a dispatcher task delivering to `listener`.
    ///
    /// The task ends once every notifier clone has been dropped and the
    /// queue is drained.
    pub(crate) fn spawn(listener: SharedListener) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ListenerEvent>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ListenerEvent::Connected => listener.on_connected().await,
                    ListenerEvent::Disconnected => listener.on_disconnected().await,
                    ListenerEvent::SpeakingStarted => listener.on_speaking_started().await,
                    ListenerEvent::SpeakingStopped => listener.on_speaking_stopped().await,
                    ListenerEvent::AudioReceived => listener.on_audio_received().await,
                    ListenerEvent::Error(message) => listener.on_error(message).await,
                }
            }
            debug!("Listener dispatcher finished");
        });

        Self {
            tx,
            disconnected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn notify(&self, event: ListenerEvent) {
        if event == ListenerEvent::Disconnected && self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.tx.send(event).is_err() {
            debug!("Listener dispatcher already stopped");
        }
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        self.notify(ListenerEvent::Error(message.into()));
    }
}
