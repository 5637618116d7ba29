use crate::{Result, WrapperError};
use async_trait::async_trait;
use infrabridge_core::{WrapperCategory, WrapperConfiguration};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Stack created on a compute backend for one service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRecord {
    pub instance_id: String,
    pub backend_uuid: String,
    pub stack_id: String,
    pub stack_name: String,
}

/// Link from a WAN backend to one attached compute backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WanLink {
    pub wan_uuid: String,
    pub compute_address: String,
}

/// Where a function or cloud service instance runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePlacement {
    pub service_instance_id: String,
    pub backend_uuid: String,
}

/// Persistent store behind the backend registry and the drivers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InfrastructureRepository: Send + Sync {
    /// Insert or replace a backend row
    async fn write_backend(&self, config: &WrapperConfiguration) -> Result<()>;

    async fn read_backend(&self, uuid: &str) -> Result<Option<WrapperConfiguration>>;

    async fn list_backends(&self, category: WrapperCategory) -> Result<Vec<String>>;

    /// Delete a backend row together with every link row naming it
    async fn remove_backend(&self, uuid: &str) -> Result<bool>;

    async fn write_network_link(&self, compute_uuid: &str, network_uuid: &str) -> Result<()>;

    async fn network_for_compute(&self, compute_uuid: &str) -> Result<Option<String>>;

    async fn write_wan_link(
        &self,
        compute_uuid: &str,
        wan_uuid: &str,
        compute_address: &str,
    ) -> Result<()>;

    async fn wan_for_compute(&self, compute_uuid: &str) -> Result<Option<WanLink>>;

    async fn write_service_instance(&self, record: StackRecord) -> Result<()>;

    async fn read_service_instance(
        &self,
        instance_id: &str,
        backend_uuid: &str,
    ) -> Result<Option<StackRecord>>;

    /// Compute backends hosting `instance_id`, sorted
    async fn backends_for_instance(&self, instance_id: &str) -> Result<Vec<String>>;

    async fn remove_service_instance(&self, instance_id: &str, backend_uuid: &str)
        -> Result<bool>;

    async fn write_function_instance(
        &self,
        function_id: &str,
        placement: InstancePlacement,
    ) -> Result<()>;

    async fn read_function_instance(&self, function_id: &str)
        -> Result<Option<InstancePlacement>>;

    async fn write_cloud_service_instance(
        &self,
        cloud_service_id: &str,
        placement: InstancePlacement,
    ) -> Result<()>;

    async fn read_cloud_service_instance(
        &self,
        cloud_service_id: &str,
    ) -> Result<Option<InstancePlacement>>;
}

#[derive(Default)]
struct Tables {
    backends: HashMap<String, WrapperConfiguration>,
    network_links: HashMap<String, String>,
    wan_links: HashMap<String, WanLink>,
    service_instances: HashMap<(String, String), StackRecord>,
    function_instances: HashMap<String, InstancePlacement>,
    cloud_service_instances: HashMap<String, InstancePlacement>,
}

/// In-memory implementation. Every call holds one lock over all tables.
#[derive(Clone)]
pub struct InMemoryInfrastructureRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryInfrastructureRepository {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T> {
        let tables = self
            .tables
            .read()
            .map_err(|_| WrapperError::Storage("Lock poisoned".to_string()))?;
        Ok(f(&tables))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| WrapperError::Storage("Lock poisoned".to_string()))?;
        Ok(f(&mut tables))
    }
}

impl Default for InMemoryInfrastructureRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InfrastructureRepository for InMemoryInfrastructureRepository {
    async fn write_backend(&self, config: &WrapperConfiguration) -> Result<()> {
        self.write(|t| {
            t.backends.insert(config.uuid.clone(), config.clone());
        })
    }

    async fn read_backend(&self, uuid: &str) -> Result<Option<WrapperConfiguration>> {
        self.read(|t| t.backends.get(uuid).cloned())
    }

    async fn list_backends(&self, category: WrapperCategory) -> Result<Vec<String>> {
        self.read(|t| {
            let mut configs: Vec<_> = t
                .backends
                .values()
                .filter(|c| c.category == category)
                .collect();
            configs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.uuid.cmp(&b.uuid)));
            configs.into_iter().map(|c| c.uuid.clone()).collect()
        })
    }

    async fn remove_backend(&self, uuid: &str) -> Result<bool> {
        self.write(|t| {
            let removed = t.backends.remove(uuid).is_some();
            t.network_links
                .retain(|compute, network| compute != uuid && network != uuid);
            t.wan_links
                .retain(|compute, link| compute != uuid && link.wan_uuid != uuid);
            t.service_instances
                .retain(|(_, backend), _| backend != uuid);
            t.function_instances
                .retain(|_, placement| placement.backend_uuid != uuid);
            t.cloud_service_instances
                .retain(|_, placement| placement.backend_uuid != uuid);
            removed
        })
    }

    async fn write_network_link(&self, compute_uuid: &str, network_uuid: &str) -> Result<()> {
        self.write(|t| {
            t.network_links
                .insert(compute_uuid.to_string(), network_uuid.to_string());
        })
    }

    async fn network_for_compute(&self, compute_uuid: &str) -> Result<Option<String>> {
        self.read(|t| t.network_links.get(compute_uuid).cloned())
    }

    async fn write_wan_link(
        &self,
        compute_uuid: &str,
        wan_uuid: &str,
        compute_address: &str,
    ) -> Result<()> {
        self.write(|t| {
            t.wan_links.insert(
                compute_uuid.to_string(),
                WanLink {
                    wan_uuid: wan_uuid.to_string(),
                    compute_address: compute_address.to_string(),
                },
            );
        })
    }

    async fn wan_for_compute(&self, compute_uuid: &str) -> Result<Option<WanLink>> {
        self.read(|t| t.wan_links.get(compute_uuid).cloned())
    }

    async fn write_service_instance(&self, record: StackRecord) -> Result<()> {
        self.write(|t| {
            t.service_instances.insert(
                (record.instance_id.clone(), record.backend_uuid.clone()),
                record,
            );
        })
    }

    async fn read_service_instance(
        &self,
        instance_id: &str,
        backend_uuid: &str,
    ) -> Result<Option<StackRecord>> {
        self.read(|t| {
            t.service_instances
                .get(&(instance_id.to_string(), backend_uuid.to_string()))
                .cloned()
        })
    }

    async fn backends_for_instance(&self, instance_id: &str) -> Result<Vec<String>> {
        self.read(|t| {
            let mut backends: Vec<_> = t
                .service_instances
                .keys()
                .filter(|(instance, _)| instance == instance_id)
                .map(|(_, backend)| backend.clone())
                .collect();
            backends.sort();
            backends
        })
    }

    async fn remove_service_instance(
        &self,
        instance_id: &str,
        backend_uuid: &str,
    ) -> Result<bool> {
        self.write(|t| {
            let removed = t
                .service_instances
                .remove(&(instance_id.to_string(), backend_uuid.to_string()))
                .is_some();
            let hosted_here = |p: &InstancePlacement| {
                p.service_instance_id == instance_id && p.backend_uuid == backend_uuid
            };
            t.function_instances.retain(|_, p| !hosted_here(&*p));
            t.cloud_service_instances.retain(|_, p| !hosted_here(&*p));
            removed
        })
    }

    async fn write_function_instance(
        &self,
        function_id: &str,
        placement: InstancePlacement,
    ) -> Result<()> {
        self.write(|t| {
            t.function_instances
                .insert(function_id.to_string(), placement);
        })
    }

    async fn read_function_instance(
        &self,
        function_id: &str,
    ) -> Result<Option<InstancePlacement>> {
        self.read(|t| t.function_instances.get(function_id).cloned())
    }

    async fn write_cloud_service_instance(
        &self,
        cloud_service_id: &str,
        placement: InstancePlacement,
    ) -> Result<()> {
        self.write(|t| {
            t.cloud_service_instances
                .insert(cloud_service_id.to_string(), placement);
        })
    }

    async fn read_cloud_service_instance(
        &self,
        cloud_service_id: &str,
    ) -> Result<Option<InstancePlacement>> {
        self.read(|t| t.cloud_service_instances.get(cloud_service_id).cloned())
    }
}
