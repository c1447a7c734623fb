use crate::config::Config;
use crate::domain::{PersistenceSink, TemperatureHistoryStore};
use anyhow::Result;
use std::sync::Arc;

pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

pub use memory::MemoryHistory;
#[cfg(feature = "db")]
pub use pg::PgHistory;

/// History store and persistence sink, backed by the same storage
pub struct Repositories {
    pub history: Arc<dyn TemperatureHistoryStore>,
    pub sink: Arc<dyn PersistenceSink>,
}

impl Repositories {
    pub async fn new(cfg: &Config) -> Result<Self> {
        #[cfg(feature = "db")]
        {
            if let Some(url) = &cfg.db.url {
                let pg = Arc::new(PgHistory::connect(url, cfg.db.max_connections.unwrap_or(5)).await?);
                tracing::info!("using postgres history");
                return Ok(Self {
                    history: pg.clone(),
                    sink: pg,
                });
            }
        }

        Ok(Self::in_memory(cfg.history.retention_hours))
    }

    pub fn in_memory(retention_hours: u32) -> Self {
        let memory = Arc::new(MemoryHistory::new(retention_hours));
        Self {
            history: memory.clone(),
            sink: memory,
        }
    }
}
