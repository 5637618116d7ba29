use infrabridge_core::StatusUpdate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Default)]
struct HubInner {
    listeners: Mutex<HashMap<String, mpsc::UnboundedSender<StatusUpdate>>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Subscription table routing status updates to the call that owns their sid.
#[derive(Clone, Default)]
pub struct StatusHub {
    inner: Arc<HubInner>,
}

impl StatusHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for `sid`. The listener is removed when the
    /// returned [`Subscription`] is dropped.
    pub fn subscribe(&self, sid: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            if listeners.insert(sid.to_string(), tx.clone()).is_some() {
                warn!(sid = %sid, "Replacing a pending listener for a reused sid");
            }
        }
        Subscription {
            sid: sid.to_string(),
            rx,
            tx,
            hub: self.clone(),
        }
    }

    /// Delivers `update` to the listener of its sid. Returns false when nobody listens.
    pub fn publish(&self, update: StatusUpdate) -> bool {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let sender = self
            .inner
            .listeners
            .lock()
            .ok()
            .and_then(|listeners| listeners.get(&update.sid).cloned());

        match sender {
            Some(tx) => {
                debug!(sid = %update.sid, status = ?update.status, "Delivering status update");
                tx.send(update).is_ok()
            }
            None => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sid = %update.sid, "Status update for a sid without listener");
                false
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn unsubscribe(&self, sid: &str, owner: &mpsc::UnboundedSender<StatusUpdate>) {
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            if listeners
                .get(sid)
                .map(|current| current.same_channel(owner))
                .unwrap_or(false)
            {
                listeners.remove(sid);
            }
        }
    }
}

pub struct Subscription {
    sid: String,
    rx: mpsc::UnboundedReceiver<StatusUpdate>,
    tx: mpsc::UnboundedSender<StatusUpdate>,
    hub: StatusHub,
}

impl Subscription {
    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub async fn recv(&mut self) -> Option<StatusUpdate> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.sid, &self.tx);
    }
}
