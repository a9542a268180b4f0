//! Backend double with a scripted sequence of replies.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex, PoisonError,
    },
};

use async_trait::async_trait;
use courier_core::Message;
use courier_delivery::{Backend, DeliveryError, Result};

/// How a scripted backend answers one `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Message accepted.
    Accept,
    /// Message rejected with a backend error.
    Reject,
}

/// Backend that answers from a script, then falls back to a fixed reply.
///
/// Every call is counted and the recipients are recorded in call order.
#[derive(Debug)]
pub struct ScriptedBackend {
    name: String,
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicU32,
    recipients: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    /// Backend that accepts every message.
    pub fn accepting(name: impl Into<String>) -> Self {
        Self::with_fallback(name, Reply::Accept)
    }

    /// Backend that rejects every message.
    pub fn rejecting(name: impl Into<String>) -> Self {
        Self::with_fallback(name, Reply::Reject)
    }

    /// Backend that rejects the first `failures` calls and accepts the rest.
    pub fn failing_times(name: impl Into<String>, failures: usize) -> Self {
        Self::accepting(name).script(std::iter::repeat(Reply::Reject).take(failures))
    }

    fn with_fallback(name: impl Into<String>, fallback: Reply) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicU32::new(0),
            recipients: Mutex::new(Vec::new()),
        }
    }

    /// Queues replies that are used before the fallback.
    #[must_use]
    pub fn script(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).extend(replies);
        self
    }

    /// Number of `send` calls so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Recipients of every `send` call, in call order.
    pub fn recipients(&self) -> Vec<String> {
        self.recipients.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recipients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.recipient.clone());

        let reply = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback);

        match reply {
            Reply::Accept => Ok(()),
            Reply::Reject => Err(DeliveryError::backend(&self.name, "scripted rejection")),
        }
    }
}
