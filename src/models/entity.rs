//! # Entity Model
//!
//! External things the backend keeps in sync: portal ads, housing-company
//! buildings, cities with transaction history. Entities are registered by
//! sitemap syncs (idempotent upsert) and never deleted by the core; flipping
//! `status` to `stopped` suppresses further scheduling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use thiserror::Error;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Stopped,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    Daily,
    Manual,
}

impl SchedulingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingStrategy::Daily => "daily",
            SchedulingStrategy::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Entity {
    /// Opaque `"<type>:<value>"` identifier, e.g. `building:12345`.
    pub entity_id: String,
    pub entity_type: String,
    pub status: EntityStatus,
    pub scheduling_strategy: SchedulingStrategy,
    /// Opaque blob snapshotted into DLQ entries for debugging.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const ENTITY_COLUMNS: &str =
    "entity_id, entity_type, status, scheduling_strategy, metadata, created_at, updated_at";

impl Entity {
    /// Insert-or-update by `entity_id`.
    pub async fn upsert(
        pool: &PgPool,
        entity_id: &str,
        entity_type: &str,
        status: EntityStatus,
        scheduling_strategy: SchedulingStrategy,
        metadata: serde_json::Value,
    ) -> Result<Entity> {
        let entity = sqlx::query_as::<_, Entity>(&format!(
            "INSERT INTO entities (entity_id, entity_type, status, scheduling_strategy, metadata) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (entity_id) DO UPDATE SET \
                 entity_type = EXCLUDED.entity_type, \
                 status = EXCLUDED.status, \
                 scheduling_strategy = EXCLUDED.scheduling_strategy, \
                 metadata = EXCLUDED.metadata, \
                 updated_at = now() \
             RETURNING {ENTITY_COLUMNS}"
        ))
        .bind(entity_id)
        .bind(entity_type)
        .bind(status.as_str())
        .bind(scheduling_strategy.as_str())
        .bind(metadata)
        .fetch_one(pool)
        .await?;

        Ok(entity)
    }

    /// Register many entities of one type in a single statement. Existing
    /// rows are left untouched; returns the number of new registrations.
    pub async fn bulk_register(
        pool: &PgPool,
        entity_ids: &[String],
        entity_type: &str,
        scheduling_strategy: SchedulingStrategy,
    ) -> Result<u64> {
        if entity_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "INSERT INTO entities (entity_id, entity_type, scheduling_strategy) \
             SELECT unnest($1::text[]), $2, $3 \
             ON CONFLICT (entity_id) DO NOTHING",
        )
        .bind(entity_ids)
        .bind(entity_type)
        .bind(scheduling_strategy.as_str())
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn find(pool: &PgPool, entity_id: &str) -> Result<Option<Entity>> {
        let entity = sqlx::query_as::<_, Entity>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE entity_id = $1"
        ))
        .bind(entity_id)
        .fetch_optional(pool)
        .await?;

        Ok(entity)
    }
}

/// A malformed or unexpected entity identifier. Classified as a permanent
/// failure: retrying will not make the id parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parse entity {entity_id:?}: {reason}")]
pub struct EntityParseError {
    pub entity_id: String,
    pub reason: String,
}

impl EntityParseError {
    pub fn new(entity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            reason: reason.into(),
        }
    }
}

/// Decomposed `"<type>:<value>"` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef<'a> {
    pub entity_type: &'a str,
    pub value: &'a str,
}

impl<'a> EntityRef<'a> {
    /// Split an entity id at its first colon. The colon is mandatory and may
    /// not be the first or last character.
    pub fn parse(entity_id: &'a str) -> std::result::Result<Self, EntityParseError> {
        match entity_id.find(':') {
            Some(index) if index > 0 && index < entity_id.len() - 1 => Ok(Self {
                entity_type: &entity_id[..index],
                value: &entity_id[index + 1..],
            }),
            _ => Err(EntityParseError::new(
                entity_id,
                "expected 'type:value' format",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_ids() {
        let parsed = EntityRef::parse("building:12345").unwrap();
        assert_eq!(parsed.entity_type, "building");
        assert_eq!(parsed.value, "12345");

        // Only the first colon splits; values may contain more.
        let parsed = EntityRef::parse("city:Helsinki:00100").unwrap();
        assert_eq!(parsed.entity_type, "city");
        assert_eq!(parsed.value, "Helsinki:00100");
    }

    #[test]
    fn rejects_missing_and_misplaced_colons() {
        for bad in ["building", ":12345", "building:", ":"] {
            let err = EntityRef::parse(bad).unwrap_err();
            assert_eq!(err.entity_id, bad);
        }
    }

    #[test]
    fn status_and_strategy_wire_strings() {
        assert_eq!(EntityStatus::Active.as_str(), "active");
        assert_eq!(EntityStatus::Stopped.as_str(), "stopped");
        assert_eq!(SchedulingStrategy::Daily.as_str(), "daily");
        assert_eq!(SchedulingStrategy::Manual.as_str(), "manual");
    }
}
