//! Call record repository
//!
//! Upserts call sessions and park orbits keyed by their natural identifiers,
//! and resolves extension numbers. Ended calls keep their row with the
//! terminal state.

use async_trait::async_trait;
use cti_core::models::{CallSession, ExtensionRef, ParkOrbit};
use cti_core::traits::CallStore;
use cti_core::{AppError, AppResult};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;

// `id` has no server default; on conflict the existing row keeps its own.
const UPSERT_CALL: &str = r#"
    INSERT INTO calls (
        id, uuid, direction, caller_id_number, caller_id_name,
        destination_number, extension_id, state,
        created_at, answered_at, ended_at, park_orbit, metadata
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
    ON CONFLICT (uuid) DO UPDATE SET
        extension_id = COALESCE(EXCLUDED.extension_id, calls.extension_id),
        state = EXCLUDED.state,
        answered_at = EXCLUDED.answered_at,
        ended_at = EXCLUDED.ended_at,
        park_orbit = EXCLUDED.park_orbit,
        metadata = EXCLUDED.metadata
"#;

const UPSERT_ORBIT: &str = r#"
    INSERT INTO park_orbits (id, orbit_number, is_occupied, occupied_by_call_uuid, parked_at)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (orbit_number) DO UPDATE SET
        is_occupied = EXCLUDED.is_occupied,
        occupied_by_call_uuid = EXCLUDED.occupied_by_call_uuid,
        parked_at = EXCLUDED.parked_at
"#;

/// PostgreSQL implementation of `CallStore`
pub struct PgCallStore {
    pool: PgPool,
}

impl PgCallStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ExtensionRow {
    id: Uuid,
    extension_number: String,
}

impl From<ExtensionRow> for ExtensionRef {
    fn from(row: ExtensionRow) -> Self {
        Self {
            id: row.id,
            extension_number: row.extension_number,
        }
    }
}

#[async_trait]
impl CallStore for PgCallStore {
    #[instrument(skip(self, call), fields(call_uuid = %call.uuid, state = %call.state))]
    async fn save_call(&self, call: &CallSession) -> AppResult<()> {
        debug!("Upserting call record");

        sqlx::query(UPSERT_CALL)
            .bind(Uuid::new_v4())
            .bind(&call.uuid)
            .bind(call.direction.as_str())
            .bind(&call.caller_id_number)
            .bind(&call.caller_id_name)
            .bind(&call.destination_number)
            .bind(call.extension.as_ref().map(|e| e.id))
            .bind(call.state.as_str())
            .bind(call.created_at)
            .bind(call.answered_at)
            .bind(call.ended_at)
            .bind(&call.park_orbit)
            .bind(Json(&call.metadata))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error saving call {}: {}", call.uuid, e);
                AppError::Persistence(format!("Failed to save call: {}", e))
            })?;

        Ok(())
    }

    #[instrument(skip(self, orbit), fields(orbit = %orbit.orbit_number, occupied = orbit.is_occupied))]
    async fn save_orbit(&self, orbit: &ParkOrbit) -> AppResult<()> {
        sqlx::query(UPSERT_ORBIT)
            .bind(Uuid::new_v4())
            .bind(&orbit.orbit_number)
            .bind(orbit.is_occupied)
            .bind(&orbit.occupied_by_call_uuid)
            .bind(orbit.parked_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error saving park orbit {}: {}", orbit.orbit_number, e);
                AppError::Persistence(format!("Failed to save park orbit: {}", e))
            })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_extension(&self, number: &str) -> AppResult<Option<ExtensionRef>> {
        let row = sqlx::query_as::<sqlx::Postgres, ExtensionRow>(
            r#"
            SELECT CAST(id AS uuid) AS id, extension_number
            FROM extensions
            WHERE extension_number = $1 AND is_active
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding extension {}: {}", number, e);
            AppError::Persistence(format!("Failed to find extension: {}", e))
        })?;

        Ok(row.map(Into::into))
    }
}
