//! Named plugins: catalogs paired with the invoker that calls them.
//!
//! Resolution is two lookups, plugin name → [`Plugin`], then operationId →
//! [`OperationDescriptor`](crate::OperationDescriptor). The map is behind a
//! read-write lock that is never held across a network round trip.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::catalog::SchemaCatalog;
use crate::error::RegistryError;
use crate::invoke::{Arguments, InvocationResult, InvokeOptions, OperationInvoker};
use crate::transport::{Transport, TransportConfig};

/// A registered catalog and the invoker used for its operations.
#[derive(Debug)]
pub struct Plugin {
    name: String,
    catalog: Arc<SchemaCatalog>,
    invoker: OperationInvoker,
}

impl Plugin {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn invoker(&self) -> &OperationInvoker {
        &self.invoker
    }
}

#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `catalog` under `name` with a reqwest transport built from `config`.
    pub fn register(
        &self,
        name: impl Into<String>,
        catalog: SchemaCatalog,
        config: TransportConfig,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        // Cheap early exit; `insert` re-checks under the write lock.
        if self.contains(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        let invoker = OperationInvoker::from_config(&config).map_err(|source| {
            RegistryError::Transport {
                plugin: name.clone(),
                source,
            }
        })?;
        self.insert(name, catalog, invoker, &config)
    }

    /// Register `catalog` under `name`, sending through a caller-supplied transport.
    pub fn register_with_transport(
        &self,
        name: impl Into<String>,
        catalog: SchemaCatalog,
        transport: Arc<dyn Transport>,
        config: TransportConfig,
    ) -> Result<(), RegistryError> {
        let invoker = OperationInvoker::with_transport(transport, &config);
        self.insert(name.into(), catalog, invoker, &config)
    }

    fn insert(
        &self,
        name: String,
        catalog: SchemaCatalog,
        invoker: OperationInvoker,
        config: &TransportConfig,
    ) -> Result<(), RegistryError> {
        let catalog = match &config.base_url_override {
            Some(url) => catalog.with_server_url(url.clone()),
            None => catalog,
        };

        let mut plugins = self.plugins.write();
        match plugins.entry(name) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateName(entry.key().clone())),
            Entry::Vacant(entry) => {
                tracing::info!(
                    plugin = %entry.key(),
                    operations = catalog.len(),
                    server = %catalog.server_base_url(),
                    "registered plugin"
                );
                let plugin = Plugin {
                    name: entry.key().clone(),
                    catalog: Arc::new(catalog),
                    invoker,
                };
                entry.insert(Arc::new(plugin));
                Ok(())
            }
        }
    }

    /// Remove a plugin. Returns whether it was registered.
    ///
    /// Invocations already in flight against it run to completion.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.plugins.write().remove(name).is_some();
        if removed {
            tracing::info!(plugin = %name, "unregistered plugin");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<Arc<Plugin>> {
        self.plugins.read().get(name).cloned()
    }

    pub fn catalog(&self, name: &str) -> Option<Arc<SchemaCatalog>> {
        self.get(name).map(|plugin| Arc::clone(&plugin.catalog))
    }

    pub async fn invoke(
        &self,
        name: &str,
        operation_id: &str,
        args: &Arguments,
    ) -> Result<InvocationResult, RegistryError> {
        self.invoke_with(name, operation_id, args, &InvokeOptions::default())
            .await
    }

    pub async fn invoke_with(
        &self,
        name: &str,
        operation_id: &str,
        args: &Arguments,
        options: &InvokeOptions,
    ) -> Result<InvocationResult, RegistryError> {
        let plugin = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownPlugin(name.to_string()))?;
        let op = plugin.catalog.operation(operation_id).ok_or_else(|| {
            RegistryError::UnknownOperation {
                plugin: name.to_string(),
                operation_id: operation_id.to_string(),
            }
        })?;

        Ok(plugin.invoker.invoke(op, args, options).await?)
    }
}
