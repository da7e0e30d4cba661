//! # System Constants
//!
//! Task-type registry, entity prefixes, priority levels and scheduling
//! defaults shared by producers, the coordinator and the workers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the shared task queue backing the worker pool.
pub const TASK_QUEUE_NAME: &str = "tasks";

/// Default number of attempts a task gets before it is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Dispatch keys for every task the backend knows how to run.
///
/// The string forms are the wire/storage representation: they are what
/// producers write into `tasks.task_type` and what the consumer dispatches on.
pub mod task_types {
    pub const FRONTDOOR_SITEMAP_SYNC: &str = "frontdoor_sitemap_sync";
    pub const FRONTDOOR_SYNC: &str = "frontdoor_sync";
    pub const SHORTCUT_SITEMAP_SYNC: &str = "shortcut_sitemap_sync";
    pub const SHORTCUT_SCRAPER_SYNC: &str = "shortcut_scraper_sync";
    pub const SHORTCUT_API_SYNC: &str = "shortcut_api_sync";
    pub const PRICES_CITIES_INIT: &str = "prices_cities_init";
    pub const PRICES_SYNC: &str = "prices_sync";
}

/// Entity-id prefixes for the `"<type>:<value>"` grammar.
pub mod entity_prefixes {
    pub const AD: &str = "ad:";
    pub const BUILDING: &str = "building:";
    pub const CITY: &str = "city:";
}

/// Task priority levels. Higher claims earlier; ties break on
/// `scheduled_for`, then `task_id`.
pub mod priority {
    pub const CRITICAL: i32 = 100;
    pub const HIGH: i32 = 10;
    pub const NORMAL: i32 = 0;
    pub const LOW: i32 = -10;
}

/// Typed view of the task-type registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FrontdoorSitemapSync,
    FrontdoorSync,
    ShortcutSitemapSync,
    ShortcutScraperSync,
    ShortcutApiSync,
    PricesCitiesInit,
    PricesSync,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::FrontdoorSitemapSync => task_types::FRONTDOOR_SITEMAP_SYNC,
            TaskType::FrontdoorSync => task_types::FRONTDOOR_SYNC,
            TaskType::ShortcutSitemapSync => task_types::SHORTCUT_SITEMAP_SYNC,
            TaskType::ShortcutScraperSync => task_types::SHORTCUT_SCRAPER_SYNC,
            TaskType::ShortcutApiSync => task_types::SHORTCUT_API_SYNC,
            TaskType::PricesCitiesInit => task_types::PRICES_CITIES_INIT,
            TaskType::PricesSync => task_types::PRICES_SYNC,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = UnknownTaskType;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            task_types::FRONTDOOR_SITEMAP_SYNC => Ok(TaskType::FrontdoorSitemapSync),
            task_types::FRONTDOOR_SYNC => Ok(TaskType::FrontdoorSync),
            task_types::SHORTCUT_SITEMAP_SYNC => Ok(TaskType::ShortcutSitemapSync),
            task_types::SHORTCUT_SCRAPER_SYNC => Ok(TaskType::ShortcutScraperSync),
            task_types::SHORTCUT_API_SYNC => Ok(TaskType::ShortcutApiSync),
            task_types::PRICES_CITIES_INIT => Ok(TaskType::PricesCitiesInit),
            task_types::PRICES_SYNC => Ok(TaskType::PricesSync),
            other => Err(UnknownTaskType(other.to_string())),
        }
    }
}

/// A task-type string outside the registry. Dispatch treats this as a
/// permanent failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTaskType(pub String);

impl fmt::Display for UnknownTaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown task type: {}", self.0)
    }
}

impl std::error::Error for UnknownTaskType {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips_through_registry_strings() {
        for task_type in [
            TaskType::FrontdoorSitemapSync,
            TaskType::FrontdoorSync,
            TaskType::ShortcutSitemapSync,
            TaskType::ShortcutScraperSync,
            TaskType::ShortcutApiSync,
            TaskType::PricesCitiesInit,
            TaskType::PricesSync,
        ] {
            assert_eq!(task_type.as_str().parse::<TaskType>().unwrap(), task_type);
        }
    }

    #[test]
    fn unknown_task_type_is_rejected() {
        let err = "frontdoor_full_resync".parse::<TaskType>().unwrap_err();
        assert_eq!(err.0, "frontdoor_full_resync");
    }

    #[test]
    fn priority_ordering() {
        assert!(priority::CRITICAL > priority::HIGH);
        assert!(priority::HIGH > priority::NORMAL);
        assert!(priority::NORMAL > priority::LOW);
    }
}
