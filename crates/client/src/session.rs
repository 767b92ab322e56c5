use std::sync::Arc;

use scanbridge_common::{BridgeConfig, MetricsRegistry, Result};
use scanbridge_storage::{Catalog, FactoryContext};

pub type SharedSession = Arc<Session>;

pub struct Session {
    pub config: BridgeConfig,
    pub catalog: Catalog,
    pub metrics: MetricsRegistry,
}

impl Session {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let metrics = MetricsRegistry::new();
        Ok(Self {
            config,
            catalog: Catalog::new(metrics.clone()),
            metrics,
        })
    }

    /// Context handed to every factory created in this session.
    pub fn factory_context(&self) -> FactoryContext {
        FactoryContext::new(self.config.clone(), self.metrics.clone())
    }

    pub fn prometheus_metrics(&self) -> String {
        self.metrics.render_prometheus()
    }
}
