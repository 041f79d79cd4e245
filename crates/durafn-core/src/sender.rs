//! The narrow seam through which the engine delivers outgoing events.
//! The production HTTP client lives in the API crate; this module holds
//! the trait and an in-memory double for tests and demos.

use crate::error::SdkError;
use crate::event::Event;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// IDs assigned by the event API to an accepted batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendEventOutput {
    pub ids: Vec<String>,
}

#[async_trait]
pub trait EventSender: Send + Sync {
    async fn send(&self, events: &[Event]) -> Result<SendEventOutput, SdkError>;
}

/// Records every batch instead of delivering it.
#[derive(Debug, Default)]
pub struct MemorySender {
    sent: Mutex<Vec<Event>>,
}

impl MemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Event> {
        self.sent.lock().expect("sender poisoned").clone()
    }
}

#[async_trait]
impl EventSender for MemorySender {
    async fn send(&self, events: &[Event]) -> Result<SendEventOutput, SdkError> {
        let mut sent = self.sent.lock().expect("sender poisoned");
        sent.extend_from_slice(events);

        Ok(SendEventOutput {
            ids: events
                .iter()
                .map(|_| uuid::Uuid::new_v4().to_string())
                .collect(),
        })
    }
}
