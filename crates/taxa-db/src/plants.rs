//! Plant entity store: `plants` and `plant_synonyms`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, trace};
use uuid::Uuid;

use taxa_core::{Entity, EntityPatch, EntityStore, Error, NameKind, Result, SynonymRecord};

/// PostgreSQL implementation of `EntityStore`.
///
/// Cloning is cheap and yields an independent handle onto the pool.
#[derive(Clone)]
pub struct PgPlantStore {
    pool: Pool<Postgres>,
}

impl PgPlantStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn entity_from_row(row: &sqlx::postgres::PgRow) -> Entity {
    Entity {
        id: row.get("id"),
        scientific_name: row.get("scientific_name"),
        display_name: row.get("display_name"),
        external_key: row.get("gbif_usage_key"),
    }
}

#[async_trait]
impl EntityStore for PgPlantStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn fetch_page(&self, offset: i64, limit: i64) -> Result<Vec<Entity>> {
        let start = Instant::now();
        let rows = sqlx::query(
            r#"
            SELECT id,
                   COALESCE(plant_scientific_name, '') AS scientific_name,
                   COALESCE(plant_name, '') AS display_name,
                   gbif_usage_key
            FROM plants
            ORDER BY id
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "plants",
            op = "fetch_page",
            offset,
            row_count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Page fetched"
        );
        Ok(rows.iter().map(entity_from_row).collect())
    }

    async fn update_entity(&self, patch: &EntityPatch) -> Result<bool> {
        let taxonomy = patch.taxonomy.clone().unwrap_or_default();
        let result = sqlx::query(
            r#"
            UPDATE plants SET
                plant_name      = COALESCE($2, plant_name),
                gbif_usage_key  = COALESCE($3, gbif_usage_key),
                family          = COALESCE($4, family),
                genus           = COALESCE($5, genus),
                rank            = COALESCE($6, rank),
                gbif_match_type = COALESCE($7, gbif_match_type),
                gbif_confidence = COALESCE($8, gbif_confidence),
                updated_at      = now()
            WHERE id = $1
            "#,
        )
        .bind(patch.entity_id)
        .bind(patch.display_name.as_deref())
        .bind(patch.external_key)
        .bind(taxonomy.family)
        .bind(taxonomy.genus)
        .bind(taxonomy.rank)
        .bind(taxonomy.match_type)
        .bind(taxonomy.confidence)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        trace!(entity_id = %patch.entity_id, rows = result.rows_affected(), "Entity updated");
        Ok(result.rows_affected() > 0)
    }

    async fn insert_synonyms(&self, rows: &[SynonymRecord]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.entity_id).collect();
        let names: Vec<String> = rows.iter().map(|r| r.name.trim().to_string()).collect();
        let kinds: Vec<&str> = rows.iter().map(|r| r.kind.as_str()).collect();
        let locales: Vec<Option<String>> = rows.iter().map(|r| r.locale.clone()).collect();

        sqlx::query(
            r#"
            INSERT INTO plant_synonyms (plant_id, name, kind, locale)
            SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::text[], $4::text[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&ids)
        .bind(&names)
        .bind(&kinds)
        .bind(&locales)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.len() as u64)
    }

    async fn scientific_synonyms(&self, entity_ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT plant_id, name
            FROM plant_synonyms
            WHERE kind = $2 AND plant_id = ANY($1)
            ORDER BY plant_id, id
            "#,
        )
        .bind(entity_ids)
        .bind(NameKind::Scientific.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| (row.get("plant_id"), row.get("name")))
            .collect())
    }

    async fn insert_entities(&self, scientific_names: &[String]) -> Result<u64> {
        if scientific_names.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO plants (plant_scientific_name, plant_name)
            SELECT n, n FROM UNNEST($1::text[]) AS n
            ON CONFLICT (plant_scientific_name) DO NOTHING
            "#,
        )
        .bind(scientific_names)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn ids_by_scientific(&self, scientific_names: &[String]) -> Result<Vec<(String, Uuid)>> {
        if scientific_names.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT plant_scientific_name, id FROM plants WHERE plant_scientific_name = ANY($1)",
        )
        .bind(scientific_names)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| (row.get("plant_scientific_name"), row.get("id")))
            .collect())
    }

    fn for_worker(&self) -> Arc<dyn EntityStore> {
        Arc::new(self.clone())
    }
}
