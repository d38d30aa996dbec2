//! Plugin loading with dependency resolution.
//!
//! A plugin registers factory types (and sometimes instances) with the
//! manager. Plugins declare the names of the plugins they depend on; those
//! are loaded first. Names pass through the configured alias table, so a
//! device can swap in its own adaptor plugin under a generic name.
//!
//! Loading is two-phase: the whole dependency tree is resolved against the
//! catalogue before anything is registered. A missing plugin or a cycle
//! anywhere in the tree therefore leaves the manager untouched.

use crate::error::{HubError, Result};
use crate::hub::manager::SensorManager;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A unit of factories loaded into the manager.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Names of plugins that must be loaded first. Aliases are resolved.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Register factory types and instances.
    fn register(&self, manager: &SensorManager);

    /// Runs after every plugin of the same load has registered.
    fn init(&self, _manager: &SensorManager) {}
}

#[derive(Default)]
pub struct PluginLoader {
    catalogue: Mutex<BTreeMap<String, Arc<dyn Plugin>>>,
    loaded: Mutex<Vec<String>>,
}

impl PluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `plugin` available for loading. Returns `false` if a plugin
    /// with the same name is already in the catalogue.
    pub fn add(&self, plugin: Arc<dyn Plugin>) -> bool {
        let mut catalogue = self.catalogue.lock();
        let name = plugin.name().to_string();
        if catalogue.contains_key(&name) {
            return false;
        }
        catalogue.insert(name, plugin);
        true
    }

    pub fn available(&self) -> Vec<String> {
        self.catalogue.lock().keys().cloned().collect()
    }

    /// Loaded plugin names, in load order.
    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().clone()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().iter().any(|n| n == name)
    }

    /// Load `name` and everything it depends on. Returns the plugins that
    /// were newly loaded, dependencies first. Loading an already loaded
    /// plugin is a no-op.
    pub fn load(&self, name: &str, manager: &SensorManager) -> Result<Vec<String>> {
        // One load at a time, so two loads never register the same plugin.
        let mut loaded = self.loaded.lock();
        let already: HashSet<String> = loaded.iter().cloned().collect();

        let mut order = Vec::new();
        let mut stack = Vec::new();
        let mut visited = HashSet::new();
        self.resolve(name, manager, &already, &mut stack, &mut visited, &mut order)
            .map_err(|e| {
                tracing::warn!("Failed to load plugin '{}': {}", name, e);
                e
            })?;

        for plugin in &order {
            tracing::debug!("Registering plugin '{}'", plugin.name());
            plugin.register(manager);
            loaded.push(plugin.name().to_string());
        }
        drop(loaded);

        for plugin in &order {
            plugin.init(manager);
        }

        let names: Vec<String> = order.iter().map(|p| p.name().to_string()).collect();
        if !names.is_empty() {
            tracing::info!("Loaded plugins: {}", names.join(", "));
        }
        Ok(names)
    }

    fn resolve(
        &self,
        requested: &str,
        manager: &SensorManager,
        already: &HashSet<String>,
        stack: &mut Vec<String>,
        visited: &mut HashSet<String>,
        order: &mut Vec<Arc<dyn Plugin>>,
    ) -> Result<()> {
        let name = manager.config().resolve_plugin_name(requested).to_string();
        if name != requested {
            tracing::debug!("Plugin '{}' resolved to '{}'", requested, name);
        }

        if let Some(pos) = stack.iter().position(|n| *n == name) {
            let mut path = stack[pos..].to_vec();
            path.push(name);
            return Err(HubError::DependencyCycle(path));
        }
        if already.contains(&name) || visited.contains(&name) {
            return Ok(());
        }

        let plugin = self
            .catalogue
            .lock()
            .get(&name)
            .cloned()
            .ok_or_else(|| HubError::PluginNotFound(name.clone()))?;

        stack.push(name.clone());
        for dependency in plugin.dependencies() {
            self.resolve(&dependency, manager, already, stack, visited, order)
                .map_err(|e| {
                    if matches!(
                        e.root(),
                        HubError::PluginNotFound(_) | HubError::DependencyCycle(_)
                    ) {
                        e
                    } else {
                        e.with_context(format!("Dependency of '{}'", name))
                    }
                })?;
        }
        stack.pop();

        visited.insert(name);
        order.push(plugin);
        Ok(())
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("available", &self.available())
            .field("loaded", &self.loaded())
            .finish()
    }
}
