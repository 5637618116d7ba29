use crate::features::heat_compute::HeatComputeWrapper;
use crate::features::mock_compute::MockComputeWrapper;
use crate::features::mock_network::MockNetworkWrapper;
use crate::features::mock_wan::MockWanWrapper;
use crate::{Result, Wrapper, WrapperContext, WrapperError};
use infrabridge_core::{WrapperCategory, WrapperConfiguration};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub type WrapperConstructor =
    fn(WrapperConfiguration, WrapperContext) -> Result<Arc<dyn Wrapper>>;

/// Registration table from `(category, vendor)` to a driver constructor.
#[derive(Clone, Default)]
pub struct WrapperFactory {
    constructors: HashMap<(WrapperCategory, String), WrapperConstructor>,
}

impl WrapperFactory {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table with every driver shipped in this crate.
    pub fn with_defaults() -> Self {
        let mut factory = Self::empty();
        factory.register(WrapperCategory::Compute, "mock", MockComputeWrapper::construct);
        factory.register(WrapperCategory::Compute, "heat", HeatComputeWrapper::construct);
        factory.register(WrapperCategory::Network, "mock", MockNetworkWrapper::construct);
        factory.register(WrapperCategory::Wan, "mock", MockWanWrapper::construct);
        factory
    }

    pub fn register(
        &mut self,
        category: WrapperCategory,
        vendor: &str,
        constructor: WrapperConstructor,
    ) {
        self.constructors
            .insert((category, vendor.to_ascii_lowercase()), constructor);
    }

    pub fn supports(&self, category: WrapperCategory, vendor: &str) -> bool {
        self.constructors
            .contains_key(&(category, vendor.to_ascii_lowercase()))
    }

    pub fn vendors(&self, category: WrapperCategory) -> Vec<String> {
        let mut vendors: Vec<_> = self
            .constructors
            .keys()
            .filter(|(c, _)| *c == category)
            .map(|(_, vendor)| vendor.clone())
            .collect();
        vendors.sort();
        vendors
    }

    pub fn create(
        &self,
        config: WrapperConfiguration,
        context: WrapperContext,
    ) -> Result<Arc<dyn Wrapper>> {
        let key = (config.category, config.vendor.to_ascii_lowercase());
        let constructor = self.constructors.get(&key).ok_or_else(|| {
            WrapperError::Configuration(format!(
                "no {} driver for vendor '{}'",
                config.category, config.vendor
            ))
        })?;
        debug!(backend = %config.uuid, category = %config.category, vendor = %config.vendor, "Constructing wrapper");
        constructor(config, context)
    }
}
