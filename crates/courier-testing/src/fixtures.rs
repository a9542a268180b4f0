//! Submission builders with sensible defaults.

use courier_core::{JobSpec, Message, Priority};
use rand::Rng;

/// A message with fixed recipient, subject, and body.
pub fn message() -> Message {
    Message::new("test@example.com", "Test subject", "Test body")
}

/// Builder for job submissions.
#[derive(Debug, Clone)]
pub struct SubmissionBuilder {
    id: String,
    recipient: String,
    priority: Priority,
}

impl Default for SubmissionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionBuilder {
    /// Creates a normal-priority submission with a random id.
    pub fn new() -> Self {
        let suffix: u32 = rand::rng().random();
        Self {
            id: format!("job_{suffix:08x}"),
            recipient: "test@example.com".to_string(),
            priority: Priority::Normal,
        }
    }

    /// Sets the job id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the recipient address.
    #[must_use]
    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Builds the submission.
    pub fn build(self) -> JobSpec {
        JobSpec::new(self.id, Message::new(self.recipient, "Test subject", "Test body"))
            .with_priority(self.priority)
    }
}
