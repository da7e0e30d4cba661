//! Housing-company portal sync handlers. Buildings are addressed by UUID in
//! the scraped pages, ads by numeric id in the JSON API.

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{EntityParseError, EntityRef, SchedulingStrategy, Task};
use crate::orchestration::HandlerError;

use super::Consumer;

#[derive(Debug, Clone, Default)]
pub struct ShortcutSitemap {
    pub building_ids: Vec<String>,
    pub ad_ids: Vec<String>,
}

#[async_trait]
pub trait ShortcutService: Send + Sync {
    async fn sync_sitemap(&self) -> Result<ShortcutSitemap, HandlerError>;
    async fn sync_building(&self, building_id: Uuid) -> Result<(), HandlerError>;
    async fn sync_ad(&self, ad_id: i64) -> Result<(), HandlerError>;
}

impl Consumer {
    pub(super) async fn handle_shortcut_sitemap_sync(&self) -> Result<(), HandlerError> {
        let sitemap = self.shortcut.sync_sitemap().await?;

        let mut attempted = 0;
        let mut failures = 0;
        if !sitemap.building_ids.is_empty() {
            attempted += 1;
            if let Err(e) = self
                .coordinator()
                .register_entities(
                    &sitemap.building_ids,
                    "shortcut_building",
                    SchedulingStrategy::Daily,
                )
                .await
            {
                warn!(error = %e, count = sitemap.building_ids.len(),
                    "failed to register building entities");
                failures += 1;
            }
        }
        if !sitemap.ad_ids.is_empty() {
            attempted += 1;
            if let Err(e) = self
                .coordinator()
                .register_entities(&sitemap.ad_ids, "shortcut_ad", SchedulingStrategy::Daily)
                .await
            {
                warn!(error = %e, count = sitemap.ad_ids.len(), "failed to register ad entities");
                failures += 1;
            }
        }
        if attempted > 0 && failures == attempted {
            return Err(HandlerError::Other(anyhow::anyhow!(
                "shortcut sitemap sync: all entity registrations failed"
            )));
        }

        info!(
            buildings = sitemap.building_ids.len(),
            ads = sitemap.ad_ids.len(),
            "shortcut sitemap sync completed"
        );
        Ok(())
    }

    pub(super) async fn handle_shortcut_scraper_sync(&self, task: &Task) -> Result<(), HandlerError> {
        let entity = EntityRef::parse(&task.entity_id)?;
        if entity.entity_type != "building" {
            return Err(EntityParseError::new(
                &task.entity_id,
                format!(
                    "expected building entity type for scraper, got: {}",
                    entity.entity_type
                ),
            )
            .into());
        }
        let building_id = Uuid::parse_str(entity.value).map_err(|_| {
            EntityParseError::new(&task.entity_id, "invalid building UUID")
        })?;

        self.shortcut.sync_building(building_id).await?;
        info!(%building_id, "shortcut building synced");
        Ok(())
    }

    pub(super) async fn handle_shortcut_api_sync(&self, task: &Task) -> Result<(), HandlerError> {
        let entity = EntityRef::parse(&task.entity_id)?;
        if entity.entity_type != "ad" {
            return Err(EntityParseError::new(
                &task.entity_id,
                format!(
                    "expected ad entity type for API sync, got: {}",
                    entity.entity_type
                ),
            )
            .into());
        }
        let ad_id: i64 = entity.value.parse().map_err(|_| {
            EntityParseError::new(&task.entity_id, "invalid ad ID")
        })?;

        self.shortcut.sync_ad(ad_id).await?;
        info!(ad_id, "shortcut ad synced");
        Ok(())
    }
}
