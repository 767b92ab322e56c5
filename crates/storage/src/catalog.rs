use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use scanbridge_common::{BridgeError, FactoryId, MetricsRegistry, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::provider::ScanSource;
use crate::statistics::TableStatistics;

/// Handle returned for a registered view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryHandle {
    pub id: FactoryId,
    pub view: String,
}

/// View name to factory bindings.
///
/// Replacing or removing a binding closes the previous factory after the map lock is
/// released, so a slow release never blocks lookups.
pub struct Catalog {
    views: RwLock<HashMap<String, Arc<dyn ScanSource>>>,
    metrics: MetricsRegistry,
}

impl Catalog {
    pub fn new(metrics: MetricsRegistry) -> Self {
        Self {
            views: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Binds `factory` under its view name.
    ///
    /// # Errors
    /// A taken view name fails unless `replace` is set.
    pub fn register(&self, factory: Arc<dyn ScanSource>, replace: bool) -> Result<FactoryHandle> {
        let handle = FactoryHandle {
            id: factory.id(),
            view: factory.view_name().to_string(),
        };
        let previous = {
            let mut views = self.views.write().expect("catalog lock poisoned");
            if !replace && views.contains_key(&handle.view) {
                return Err(BridgeError::Contract(format!(
                    "view '{}' is already registered",
                    handle.view
                )));
            }
            let previous = views.insert(handle.view.clone(), factory);
            self.update_gauges(&views);
            previous
        };
        if let Some(previous) = previous {
            info!(view = %handle.view, old = %previous.id(), new = %handle.id, "view replaced");
            previous.close();
        } else {
            info!(view = %handle.view, factory = %handle.id, "view registered");
        }
        Ok(handle)
    }

    /// Removes and closes the factory bound to `view`; false when nothing was bound.
    pub fn unregister(&self, view: &str) -> bool {
        let removed = {
            let mut views = self.views.write().expect("catalog lock poisoned");
            let removed = views.remove(view);
            self.update_gauges(&views);
            removed
        };
        match removed {
            Some(factory) => {
                factory.close();
                info!(view, factory = %factory.id(), "view unregistered");
                true
            }
            None => false,
        }
    }

    /// Like [`Catalog::unregister`], but only while `handle` is still the bound factory.
    pub fn unregister_handle(&self, handle: &FactoryHandle) -> bool {
        let removed = {
            let mut views = self.views.write().expect("catalog lock poisoned");
            if views.get(&handle.view).map(|f| f.id()) != Some(handle.id) {
                return false;
            }
            let removed = views.remove(&handle.view);
            self.update_gauges(&views);
            removed
        };
        if let Some(factory) = removed {
            factory.close();
            info!(view = %handle.view, factory = %handle.id, "view unregistered");
        }
        true
    }

    pub fn get(&self, view: &str) -> Result<Arc<dyn ScanSource>> {
        self.views
            .read()
            .expect("catalog lock poisoned")
            .get(view)
            .cloned()
            .ok_or_else(|| BridgeError::Contract(format!("unknown view: {view}")))
    }

    /// Registered view names, sorted.
    pub fn views(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .views
            .read()
            .expect("catalog lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Closes and removes every factory.
    pub fn close_all(&self) {
        let drained: Vec<_> = {
            let mut views = self.views.write().expect("catalog lock poisoned");
            let drained = views.drain().map(|(_, f)| f).collect();
            self.update_gauges(&views);
            drained
        };
        for factory in drained {
            factory.close();
        }
    }

    fn update_gauges(&self, views: &HashMap<String, Arc<dyn ScanSource>>) {
        let mut counts: HashMap<&'static str, u64> =
            HashMap::from([("arrow_table", 0), ("holder", 0)]);
        for factory in views.values() {
            *counts.entry(factory.kind()).or_default() += 1;
        }
        for (kind, count) in counts {
            self.metrics.set_registered_factories(kind, count);
        }
    }
}

impl Drop for Catalog {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Parquet-backed view declared in a catalog file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub deferred_release: Option<bool>,
    #[serde(default)]
    pub statistics: Option<TableStatistics>,
}

/// Reads a JSON array of [`TableDef`].
pub fn load_table_defs(path: impl AsRef<std::path::Path>) -> Result<Vec<TableDef>> {
    let s = fs::read_to_string(path)?;
    serde_json::from_str(&s).map_err(|e| BridgeError::InvalidConfig(e.to_string()))
}
