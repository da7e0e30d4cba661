//! # Consumers
//!
//! The task-type dispatch surface. [`Consumer`] is the backend's
//! [`TaskHandler`]: it routes each leased task to the matching sync handler
//! by its `task_type` tag. The three scraped portals stay behind service
//! traits ([`FrontdoorService`], [`ShortcutService`], [`PricesService`]);
//! their HTTP clients and field mappers live in their own crates.

pub mod frontdoor;
pub mod prices;
pub mod shortcut;

pub use frontdoor::{FrontdoorService, FrontdoorSitemap};
pub use prices::PricesService;
pub use shortcut::{ShortcutService, ShortcutSitemap};

use async_trait::async_trait;
use std::sync::Arc;

use crate::constants::TaskType;
use crate::models::Task;
use crate::orchestration::{Coordinator, HandlerError, TaskHandler};

pub struct Consumer {
    coordinator: Arc<Coordinator>,
    frontdoor: Arc<dyn FrontdoorService>,
    shortcut: Arc<dyn ShortcutService>,
    prices: Arc<dyn PricesService>,
}

impl Consumer {
    pub fn new(
        coordinator: Arc<Coordinator>,
        frontdoor: Arc<dyn FrontdoorService>,
        shortcut: Arc<dyn ShortcutService>,
        prices: Arc<dyn PricesService>,
    ) -> Self {
        Self {
            coordinator,
            frontdoor,
            shortcut,
            prices,
        }
    }

    pub(crate) fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }
}

#[async_trait]
impl TaskHandler for Consumer {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        let task_type: TaskType = task.task_type.parse()?;
        match task_type {
            TaskType::FrontdoorSitemapSync => self.handle_frontdoor_sitemap_sync().await,
            TaskType::FrontdoorSync => self.handle_frontdoor_sync(task).await,
            TaskType::ShortcutSitemapSync => self.handle_shortcut_sitemap_sync().await,
            TaskType::ShortcutScraperSync => self.handle_shortcut_scraper_sync(task).await,
            TaskType::ShortcutApiSync => self.handle_shortcut_api_sync(task).await,
            TaskType::PricesCitiesInit => self.handle_prices_cities_init().await,
            TaskType::PricesSync => self.handle_prices_sync(task).await,
        }
    }
}
