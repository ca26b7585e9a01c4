use std::sync::Mutex;

/// Transient user-visible notification channel (a toast).
///
/// Fire-and-forget: implementations must not block and cannot fail.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Emits notices as tracing events under the `notice` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        tracing::info!(target: "notice", "{message}");
    }
}

/// Buffers notices until a UI layer drains them.
#[derive(Debug, Default)]
pub struct QueueNotifier {
    pending: Mutex<Vec<String>>,
}

impl QueueNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every notice raised since the last drain, oldest first.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Notifier for QueueNotifier {
    fn notify(&self, message: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
    }
}
