//! Engine-owned device registry collector.

use crate::domain::ports::SourceCollector;
use crate::engine::bdev::Bdev;
use crate::engine::catalog::SpdkClient;
use crate::error::Result;
use async_trait::async_trait;
use tracing::debug;

/// Collects the engine's bdevs; an unreachable engine fails the collector
pub struct EngineInventoryCollector {
    client: SpdkClient,
}

impl EngineInventoryCollector {
    pub fn new(client: SpdkClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceCollector for EngineInventoryCollector {
    type Record = Bdev;

    fn name(&self) -> &'static str {
        "engine"
    }

    async fn collect(&self) -> Result<Vec<Bdev>> {
        self.client.check_connection().await?;
        let bdevs = self.client.get_bdevs(None).await?;
        debug!("Engine reported {} bdevs", bdevs.len());
        Ok(bdevs)
    }
}
