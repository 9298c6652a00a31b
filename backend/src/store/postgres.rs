//! PostgreSQL-backed document store
//!
//! Each collection is a table of JSONB documents:
//!
//! ```sql
//! CREATE TABLE "Harvest" (seq BIGSERIAL, id TEXT PRIMARY KEY, doc JSONB NOT NULL)
//! ```
//!
//! `seq` keeps scans in insertion order. Updates are a single `UPDATE`
//! statement, so concurrent pushes to the same array never lose elements.

use std::time::Duration;

use serde_json::Value;
use shared::ObjectId;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{
    ensure_id, push_target_error, Collection, Cursor, Document, DocumentStore, Filter,
    StoreResult, Update, UpdateOutcome, ID_FIELD,
};
use crate::config::DatabaseConfig;

/// Document store over a PostgreSQL connection pool
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        tracing::info!("Connecting to database...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;
        tracing::info!("Database connection established");
        Ok(Self::new(pool))
    }

    /// Create the collection tables when they do not exist yet
    pub async fn ensure_collections(&self) -> StoreResult<()> {
        for collection in Collection::ALL {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 seq BIGSERIAL NOT NULL, \
                 id TEXT PRIMARY KEY, \
                 doc JSONB NOT NULL)",
                table(collection)
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS harvest_id_farm_lot_idx ON "Harvest" ((doc -> 'idFarmLot'))"#,
        )
        .execute(&self.pool)
        .await?;

        tracing::debug!("Collection tables ready");
        Ok(())
    }
}

impl DocumentStore for PgDocumentStore {
    async fn find(&self, collection: Collection, filter: &Filter) -> StoreResult<Cursor> {
        let mut query = select_documents(collection, filter);
        query.push(" ORDER BY seq");

        let rows: Vec<Json<Document>> = query
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await?;

        Ok(Cursor::new(
            collection,
            rows.into_iter().map(|Json(document)| document).collect(),
        ))
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Document>> {
        let mut query = select_documents(collection, filter);
        query.push(" ORDER BY seq LIMIT 1");

        let row: Option<Json<Document>> = query
            .build_query_scalar()
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|Json(document)| document))
    }

    async fn insert_one(
        &self,
        collection: Collection,
        mut document: Document,
    ) -> StoreResult<ObjectId> {
        let id = ensure_id(&mut document)?;

        let sql = format!("INSERT INTO {} (id, doc) VALUES ($1, $2)", table(collection));
        sqlx::query(&sql)
            .bind(id.to_hex())
            .bind(Json(&document))
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateOutcome> {
        let mut query = update_statement(collection, filter, update);
        let result = query.build().execute(&self.pool).await?;

        // PostgreSQL counts a matched row as updated even when the value is unchanged
        let affected = result.rows_affected();
        if affected == 0 {
            // The push guard skipped a document whose field is not an array
            if let Update::Push(field, _) = update {
                if let Some(document) = self.find_one(collection, filter).await? {
                    if let Some(current) = document.get(field) {
                        return Err(push_target_error(field, current));
                    }
                }
            }
        }
        Ok(UpdateOutcome {
            matched: affected,
            modified: affected,
        })
    }
}

fn table(collection: Collection) -> String {
    format!("\"{}\"", collection.name())
}

fn select_documents(collection: Collection, filter: &Filter) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new(format!("SELECT doc FROM {} WHERE ", table(collection)));
    push_filter(&mut query, filter);
    query
}

fn push_filter(query: &mut QueryBuilder<'static, Postgres>, filter: &Filter) {
    match filter {
        Filter::All => {
            query.push("TRUE");
        }
        Filter::Eq(field, value) if field == ID_FIELD => {
            push_id_match(query, value);
        }
        Filter::Eq(field, value) => {
            query.push("doc -> ");
            query.push_bind(field.clone());
            query.push(" = ");
            query.push_bind(value.clone());
        }
        Filter::In(field, values) if field == ID_FIELD && values.iter().all(Value::is_string) => {
            let ids: Vec<String> = values
                .iter()
                .filter_map(|value| value.as_str().map(str::to_owned))
                .collect();
            query.push("id = ANY(");
            query.push_bind(ids);
            query.push(")");
        }
        Filter::In(field, values) => {
            query.push_bind(Value::Array(values.clone()));
            query.push(" @> jsonb_build_array(doc -> ");
            query.push_bind(field.clone());
            query.push(")");
        }
    }
}

/// `_id` lookups use the primary key column
fn push_id_match(query: &mut QueryBuilder<'static, Postgres>, value: &Value) {
    match value {
        Value::String(id) => {
            query.push("id = ");
            query.push_bind(id.clone());
        }
        other => {
            query.push("doc -> '_id' = ");
            query.push_bind(other.clone());
        }
    }
}

fn update_statement(
    collection: Collection,
    filter: &Filter,
    update: &Update,
) -> QueryBuilder<'static, Postgres> {
    let table = table(collection);
    let mut query = QueryBuilder::new(format!("UPDATE {} SET doc = ", table));

    match update {
        Update::Set(field, value) => {
            query.push("jsonb_set(doc, ARRAY[");
            query.push_bind(field.clone());
            query.push("]::text[], ");
            query.push_bind(value.clone());
            query.push(", true)");
        }
        Update::Push(field, value) => {
            query.push("jsonb_set(doc, ARRAY[");
            query.push_bind(field.clone());
            query.push("]::text[], COALESCE(doc -> ");
            query.push_bind(field.clone());
            query.push(", '[]'::jsonb) || jsonb_build_array(");
            query.push_bind(value.clone());
            query.push("), true)");
        }
    }

    query.push(format!(" WHERE id = (SELECT id FROM {} WHERE ", table));
    push_filter(&mut query, filter);
    query.push(" ORDER BY seq LIMIT 1)");

    // Only arrays, or a missing field, accept a push
    if let Update::Push(field, _) = update {
        query.push(" AND (doc -> ");
        query.push_bind(field.clone());
        query.push(" IS NULL OR jsonb_typeof(doc -> ");
        query.push_bind(field.clone());
        query.push(") = 'array')");
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_all() {
        let query = select_documents(Collection::Harvest, &Filter::All);
        assert_eq!(query.sql(), r#"SELECT doc FROM "Harvest" WHERE TRUE"#);
    }

    #[test]
    fn test_select_by_field() {
        let query = select_documents(Collection::Harvest, &Filter::eq("idFarmLot", "abc"));
        assert_eq!(
            query.sql(),
            r#"SELECT doc FROM "Harvest" WHERE doc -> $1 = $2"#
        );
    }

    #[test]
    fn test_select_by_id_uses_primary_key() {
        let query = select_documents(Collection::Harvest, &Filter::by_id(ObjectId::new()));
        assert_eq!(query.sql(), r#"SELECT doc FROM "Harvest" WHERE id = $1"#);
    }

    #[test]
    fn test_select_id_membership_uses_primary_key() {
        let filter = Filter::In(ID_FIELD.into(), vec![json!("a"), json!("b")]);
        let query = select_documents(Collection::Estimates, &filter);
        assert_eq!(query.sql(), r#"SELECT doc FROM "Estimates" WHERE id = ANY($1)"#);
    }

    #[test]
    fn test_select_field_membership() {
        let filter = Filter::In("harvestId".into(), vec![json!("a"), json!(3)]);
        let query = select_documents(Collection::Estimates, &filter);
        assert_eq!(
            query.sql(),
            r#"SELECT doc FROM "Estimates" WHERE $1 @> jsonb_build_array(doc -> $2)"#
        );
    }

    #[test]
    fn test_push_is_a_single_statement_guarded_to_arrays() {
        let query = update_statement(
            Collection::Harvest,
            &Filter::by_id(ObjectId::new()),
            &Update::push("estimates", "e1"),
        );
        assert_eq!(
            query.sql(),
            "UPDATE \"Harvest\" SET doc = jsonb_set(doc, ARRAY[$1]::text[], \
             COALESCE(doc -> $2, '[]'::jsonb) || jsonb_build_array($3), true) \
             WHERE id = (SELECT id FROM \"Harvest\" WHERE id = $4 ORDER BY seq LIMIT 1) \
             AND (doc -> $5 IS NULL OR jsonb_typeof(doc -> $6) = 'array')"
        );
    }

    #[test]
    fn test_set_statement() {
        let query = update_statement(
            Collection::Harvest,
            &Filter::by_id(ObjectId::new()),
            &Update::set("summaryFinalProduction", "p1"),
        );
        assert_eq!(
            query.sql(),
            "UPDATE \"Harvest\" SET doc = jsonb_set(doc, ARRAY[$1]::text[], $2, true) \
             WHERE id = (SELECT id FROM \"Harvest\" WHERE id = $3 ORDER BY seq LIMIT 1)"
        );
    }
}
