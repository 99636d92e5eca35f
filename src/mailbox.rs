//! Single-slot response mailbox for operations answered synchronously.
//!
//! A waiting caller claims the receiving end, drains anything stale, submits
//! its task and waits for the reply tagged with that task's id. Replies are
//! posted from worker threads with a non-blocking send.

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, mpsc};

use crate::error::CallError;

/// `Ok` carries the hook's reply; `Err` the failure reason.
pub type Reply = Result<Value, String>;

#[derive(Debug)]
struct Envelope {
    task_id: String,
    reply: Reply,
}

pub struct Mailbox {
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<mpsc::Receiver<Envelope>>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Posts a reply; drops it with a warning if the slot is still occupied.
    pub fn put(&self, task_id: &str, reply: Reply) {
        let envelope = Envelope {
            task_id: task_id.to_string(),
            reply,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => tracing::debug!(task_id, "reply posted"),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(task_id = %dropped.task_id, "response mailbox full, reply dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(task_id, "response mailbox closed");
            }
        }
    }

    /// Exclusive access to the receiving end. Only one caller may wait.
    pub fn claim(&self) -> Result<MailboxClaim<'_>, CallError> {
        self.rx
            .try_lock()
            .map(|rx| MailboxClaim { rx })
            .map_err(|_| CallError::MailboxBusy)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MailboxClaim<'a> {
    rx: MutexGuard<'a, mpsc::Receiver<Envelope>>,
}

impl MailboxClaim<'_> {
    /// Discards replies nobody waited for. Returns how many were dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(stale) = self.rx.try_recv() {
            tracing::warn!(task_id = %stale.task_id, "discarding stale reply");
            dropped += 1;
        }
        dropped
    }

    /// Waits for the reply to `task_id`, skipping any other.
    pub async fn take(&mut self, task_id: &str) -> Result<Value, CallError> {
        loop {
            match self.rx.recv().await {
                Some(envelope) if envelope.task_id == task_id => {
                    return envelope.reply.map_err(CallError::Failed);
                }
                Some(envelope) => {
                    tracing::warn!(task_id = %envelope.task_id, expected = task_id, "reply for another task");
                }
                None => return Err(CallError::Closed),
            }
        }
    }
}
