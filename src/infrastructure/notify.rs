use crate::domain::events::EngineEvent;
use crate::domain::ports::NotificationSink;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Emits engine events as structured log lines. The default sink for the
/// replay binary.
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, event: EngineEvent) {
        tracing::info!(?event, "engine event");
    }
}

/// Captures events for inspection in tests.
#[derive(Default, Clone)]
pub struct MemorySink {
    events: Arc<RwLock<Vec<EngineEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<EngineEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn notify(&self, event: EngineEvent) {
        self.events.write().await.push(event);
    }
}
