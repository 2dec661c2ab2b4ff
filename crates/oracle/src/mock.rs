//! Scripted oracle for testing without real API calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::generator::{GenerationParams, Generator, Message, OracleError};

/// One scripted response.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    /// Produce an API error with this HTTP status.
    Status(u16),
    Timeout,
}

impl MockReply {
    pub fn text(s: impl Into<String>) -> Self {
        MockReply::Text(s.into())
    }
}

/// Counter handle shared with tests.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// A generator that replays a scripted queue of replies, recording every
/// prompt it was sent. Falls back to a default reply once the script drains.
pub struct MockGenerator {
    script: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<String>>,
    default: Option<String>,
    calls: CallCounter,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            default: None,
            calls: CallCounter::default(),
        }
    }

    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default = Some(text.into());
        self
    }

    pub fn push(&self, reply: MockReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push(MockReply::text(text));
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }

    /// Every user-message prompt received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(
        &self,
        messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<String, OracleError> {
        self.calls.0.fetch_add(1, Ordering::SeqCst);
        if let Some(user) = messages.iter().rev().find(|m| m.role == crate::Role::User) {
            self.prompts.lock().unwrap().push(user.content.clone());
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(MockReply::Text(t)) => Ok(t),
            Some(MockReply::Status(status)) => Err(OracleError::Api {
                status,
                body: "scripted failure".into(),
            }),
            Some(MockReply::Timeout) => Err(OracleError::Timeout),
            None => match &self.default {
                Some(t) => Ok(t.clone()),
                None => Err(OracleError::Malformed("mock script exhausted".into())),
            },
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_in_order() {
        let mock = MockGenerator::new();
        mock.push_text("one");
        mock.push(MockReply::Status(500));

        let p = GenerationParams::default();
        assert_eq!(mock.generate(&[Message::user("a")], &p).await.unwrap(), "one");
        assert!(mock.generate(&[Message::user("b")], &p).await.is_err());
        assert!(mock.generate(&[Message::user("c")], &p).await.is_err());
        assert_eq!(mock.calls().count(), 3);
        assert_eq!(mock.prompts(), vec!["a", "b", "c"]);
    }
}
