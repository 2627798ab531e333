use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Progress,
    Notice,
}

/// One human-readable progress line streamed to a UI during a long-running
/// compile or repair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressPayload {
    #[serde(rename = "type")]
    pub kind: PayloadKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub message: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl ProgressPayload {
    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Notice,
            id: None,
            message: message.into(),
            disabled: false,
        }
    }

    pub fn rule(id: i64, index: usize, disabled: bool) -> Self {
        Self {
            kind: PayloadKind::Progress,
            id: Some(id),
            message: format!(
                "Rule {} (ID: {}){}",
                index + 1,
                id,
                if disabled { " [DISABLED]" } else { "" }
            ),
            disabled,
        }
    }
}

/// Channel used to stream compile/repair progress lines. Implementations
/// must never block the caller.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, payload: ProgressPayload);
}

/// Sink that discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _payload: ProgressPayload) {}
}

/// Sink backed by an unbounded tokio channel; the receiving half is handed
/// to whatever forwards lines to the UI.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressPayload>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, payload: ProgressPayload) {
        // Receiver gone means nobody is watching; that is fine.
        let _ = self.tx.send(payload);
    }
}

/// Sink that records every payload, for assertions in tests.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressPayload>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<ProgressPayload> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.message.clone())
            .collect()
    }
}

impl ProgressSink for MemorySink {
    fn emit(&self, payload: ProgressPayload) {
        self.events.lock().unwrap().push(payload);
    }
}
