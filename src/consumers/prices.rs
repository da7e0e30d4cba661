//! Historical-transactions portal sync handlers. The init task discovers the
//! city list and registers each as a daily entity; per-city syncs pull that
//! city's transactions.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::constants::entity_prefixes;
use crate::models::{EntityParseError, EntityRef, SchedulingStrategy, Task};
use crate::orchestration::HandlerError;

use super::Consumer;

#[async_trait]
pub trait PricesService: Send + Sync {
    async fn fetch_cities(&self) -> Result<Vec<String>, HandlerError>;
    async fn sync_city(&self, city: &str) -> Result<(), HandlerError>;
}

impl Consumer {
    pub(super) async fn handle_prices_cities_init(&self) -> Result<(), HandlerError> {
        info!("processing prices cities initialization task");
        let cities = self.prices.fetch_cities().await?;
        if cities.is_empty() {
            return Ok(());
        }

        let city_entity_ids: Vec<String> = cities
            .iter()
            .map(|city| format!("{}{city}", entity_prefixes::CITY))
            .collect();
        match self
            .coordinator()
            .register_entities(&city_entity_ids, "prices_city", SchedulingStrategy::Daily)
            .await
        {
            Ok(count) => info!(count, "city entities registered"),
            Err(e) => warn!(error = %e, "failed to register city entities"),
        }
        Ok(())
    }

    pub(super) async fn handle_prices_sync(&self, task: &Task) -> Result<(), HandlerError> {
        let entity = EntityRef::parse(&task.entity_id)?;
        if entity.entity_type != "city" {
            return Err(EntityParseError::new(
                &task.entity_id,
                format!(
                    "expected city entity type for prices sync, got: {}",
                    entity.entity_type
                ),
            )
            .into());
        }

        info!(city = entity.value, "syncing prices for city");
        self.prices.sync_city(entity.value).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fixture, task_of};
    use crate::orchestration::{classify, HandlerError, TaskHandler};

    #[tokio::test]
    async fn prices_sync_rejects_non_city_entities() {
        let fixture = fixture();

        let err = fixture
            .consumer
            .handle(&task_of("prices_sync", "building:7"))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::EntityParse(_)));
        assert_eq!(classify(&err).permanent_reason(), Some("invalid entity format"));
    }

    #[tokio::test]
    async fn cities_init_with_no_cities_is_a_success() {
        let fixture = fixture();
        fixture
            .consumer
            .handle(&task_of("prices_cities_init", "portal:prices"))
            .await
            .unwrap();
    }
}
