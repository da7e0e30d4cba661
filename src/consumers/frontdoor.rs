//! Listings-portal sync handlers. The sitemap sync discovers ad and building
//! ids and registers them for daily scheduling; per-entity syncs delegate to
//! the portal service.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{EntityParseError, EntityRef, SchedulingStrategy, Task};
use crate::orchestration::HandlerError;

use super::Consumer;

/// Entity ids discovered in the portal sitemap, already in
/// `"<type>:<value>"` form.
#[derive(Debug, Clone, Default)]
pub struct FrontdoorSitemap {
    pub ad_ids: Vec<String>,
    pub building_ids: Vec<String>,
}

#[async_trait]
pub trait FrontdoorService: Send + Sync {
    async fn sync_sitemap(&self) -> Result<FrontdoorSitemap, HandlerError>;
    async fn sync_ad(&self, external_id: &str) -> Result<(), HandlerError>;
    async fn sync_building(&self, external_id: &str) -> Result<(), HandlerError>;
}

impl Consumer {
    pub(super) async fn handle_frontdoor_sitemap_sync(&self) -> Result<(), HandlerError> {
        let sitemap = self.frontdoor.sync_sitemap().await?;

        let mut attempted = 0;
        let mut failures = 0;
        if !sitemap.ad_ids.is_empty() {
            attempted += 1;
            if let Err(e) = self
                .coordinator()
                .register_entities(&sitemap.ad_ids, "frontdoor_ad", SchedulingStrategy::Daily)
                .await
            {
                warn!(error = %e, count = sitemap.ad_ids.len(), "failed to register ad entities");
                failures += 1;
            }
        }
        if !sitemap.building_ids.is_empty() {
            attempted += 1;
            if let Err(e) = self
                .coordinator()
                .register_entities(
                    &sitemap.building_ids,
                    "frontdoor_building",
                    SchedulingStrategy::Daily,
                )
                .await
            {
                warn!(error = %e, count = sitemap.building_ids.len(),
                    "failed to register building entities");
                failures += 1;
            }
        }
        if attempted > 0 && failures == attempted {
            return Err(HandlerError::Other(anyhow::anyhow!(
                "frontdoor sitemap sync: all entity registrations failed"
            )));
        }

        info!(
            ads = sitemap.ad_ids.len(),
            buildings = sitemap.building_ids.len(),
            "frontdoor sitemap sync completed"
        );
        Ok(())
    }

    pub(super) async fn handle_frontdoor_sync(&self, task: &Task) -> Result<(), HandlerError> {
        let entity = EntityRef::parse(&task.entity_id)?;
        match entity.entity_type {
            "ad" => {
                self.frontdoor.sync_ad(entity.value).await?;
                info!(external_id = entity.value, "frontdoor ad synced");
                Ok(())
            }
            "building" => {
                self.frontdoor.sync_building(entity.value).await?;
                info!(external_id = entity.value, "frontdoor building synced");
                Ok(())
            }
            other => Err(EntityParseError::new(
                &task.entity_id,
                format!("unknown frontdoor entity type: {other}"),
            )
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fixture, task_of};
    use crate::orchestration::{classify, HandlerError, TaskHandler};

    #[tokio::test]
    async fn unknown_frontdoor_entity_type_is_permanent() {
        let fixture = fixture();
        let task = task_of("frontdoor_sync", "city:Helsinki");

        let err = fixture.consumer.handle(&task).await.unwrap_err();
        assert!(matches!(err, HandlerError::EntityParse(_)));
        assert_eq!(classify(&err).permanent_reason(), Some("invalid entity format"));
    }

    #[tokio::test]
    async fn malformed_entity_id_is_permanent() {
        let fixture = fixture();
        let task = task_of("frontdoor_sync", "no-colon-here");

        let err = fixture.consumer.handle(&task).await.unwrap_err();
        assert!(matches!(err, HandlerError::EntityParse(_)));
    }

    #[tokio::test]
    async fn empty_sitemap_completes_without_registration() {
        let fixture = fixture();
        let task = task_of("frontdoor_sitemap_sync", "sitemap:frontdoor");
        fixture.consumer.handle(&task).await.unwrap();
    }
}
