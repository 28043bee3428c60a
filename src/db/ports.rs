use std::collections::HashSet;
use std::ops::RangeInclusive;
use tracing::{debug, warn};

use crate::docker::ContainerRuntime;
use crate::error::{AppError, Result};
use crate::storage::CatalogStore;

/// Finds free host ports from live runtime and catalog state.
///
/// Nothing is reserved: every call recomputes the occupied set, so callers
/// must hold the allocation lock until the catalog row carrying the port exists.
pub struct PortAllocator {
    range: RangeInclusive<u16>,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self { range }
    }

    pub async fn allocate(
        &self,
        runtime: &dyn ContainerRuntime,
        catalog: &CatalogStore,
    ) -> Result<u16> {
        let mut used: HashSet<u16> = runtime.published_ports().await?.into_iter().collect();
        used.extend(catalog.list_ports().await?);

        let port = lowest_free_port(&self.range, &used)?;
        debug!("Allocated port {} ({} ports in use)", port, used.len());
        Ok(port)
    }
}

pub fn lowest_free_port(range: &RangeInclusive<u16>, used: &HashSet<u16>) -> Result<u16> {
    range.clone().find(|port| !used.contains(port)).ok_or_else(|| {
        warn!("No ports available in range {:?}", range);
        AppError::ResourceExhausted {
            start: *range.start(),
            end: *range.end(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_instance, seed_principal, FakeRuntime};

    #[test]
    fn picks_lowest_gap() {
        let used: HashSet<u16> = [1100, 1101, 1103].into_iter().collect();
        assert_eq!(lowest_free_port(&(1100..=1200), &used).unwrap(), 1102);
    }

    #[test]
    fn exhausted_range_fails() {
        let used: HashSet<u16> = (1100..=1102).collect();
        let err = lowest_free_port(&(1100..=1102), &used).unwrap_err();
        assert!(matches!(
            err,
            AppError::ResourceExhausted {
                start: 1100,
                end: 1102
            }
        ));
    }

    #[tokio::test]
    async fn skips_runtime_and_catalog_ports() {
        let runtime = FakeRuntime::new();
        runtime.publish_foreign_port(1100);
        let catalog = CatalogStore::in_memory().unwrap();
        let owner = seed_principal(&catalog, "owner").await;
        let mut record = sample_instance("owner-db", owner.id);
        record.port = 1101;
        catalog.insert_instance(&record).await.unwrap();

        let allocator = PortAllocator::new(1100..=1200);
        let port = allocator.allocate(&runtime, &catalog).await.unwrap();
        assert_eq!(port, 1102);
    }
}
