//! Catalog index over PostgreSQL.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use dc_common::{Dataset, DcError, DcResult, Product};

use crate::changes::unsafe_changes;

const STATUS_ACTIVE: &str = "active";
const STATUS_ARCHIVED: &str = "archived";

/// Database connection pool and catalog operations.
pub struct Catalog {
    pool: PgPool,
}

impl Catalog {
    /// Create a new catalog connection from database URL.
    pub async fn connect(database_url: &str) -> DcResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| DcError::DatabaseError(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> DcResult<()> {
        // Split SQL statements and execute them individually
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| DcError::DatabaseError(format!("Migration failed: {}", e)))?;
            }
        }

        Ok(())
    }

    /// Register a product definition.
    pub async fn add_product(&self, definition: &Value) -> DcResult<Product> {
        let product = Product::from_definition(definition.clone())?;

        sqlx::query(
            "INSERT INTO products (name, definition, added_at) VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO UPDATE SET definition = EXCLUDED.definition",
        )
        .bind(&product.name)
        .bind(definition)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| DcError::DatabaseError(format!("Insert failed: {}", e)))?;

        Ok(product)
    }

    /// Look up a product by name.
    pub async fn get_product(&self, name: &str) -> DcResult<Option<Product>> {
        let definition = sqlx::query_scalar::<_, Value>(
            "SELECT definition FROM products WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DcError::DatabaseError(format!("Query failed: {}", e)))?;

        definition.map(Product::from_definition).transpose()
    }

    /// All registered products.
    pub async fn list_products(&self) -> DcResult<Vec<Product>> {
        let definitions = sqlx::query_scalar::<_, Value>(
            "SELECT definition FROM products ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DcError::DatabaseError(format!("Query failed: {}", e)))?;

        definitions
            .into_iter()
            .map(Product::from_definition)
            .collect()
    }

    /// Whether a dataset with this id exists (in any status).
    pub async fn has_dataset(&self, id: Uuid) -> DcResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM datasets WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DcError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(found > 0)
    }

    /// Fetch a stored dataset by id.
    pub async fn get_dataset(&self, id: Uuid) -> DcResult<Option<StoredDataset>> {
        let row = sqlx::query_as::<_, DatasetRow>(
            "SELECT id, product, metadata, uri, status, added_at, updated_at, archived_at \
             FROM datasets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DcError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(row.map(|r| r.into()))
    }

    /// Add a new dataset to the index.
    pub async fn add_dataset(&self, dataset: &Dataset) -> DcResult<Uuid> {
        let result = sqlx::query(
            "INSERT INTO datasets (id, product, metadata, uri, status, added_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(dataset.id)
        .bind(&dataset.product_name)
        .bind(&dataset.raw)
        .bind(&dataset.uri)
        .bind(STATUS_ACTIVE)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| DcError::DatabaseError(format!("Insert failed: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DcError::DuplicateDataset(dataset.id));
        }

        for source in &dataset.sources {
            sqlx::query(
                "INSERT INTO dataset_sources (dataset_id, source_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(dataset.id)
            .bind(source)
            .execute(&self.pool)
            .await
            .map_err(|e| DcError::DatabaseError(format!("Insert failed: {}", e)))?;
        }

        debug!(id = %dataset.id, product = %dataset.product_name, "Added dataset");
        Ok(dataset.id)
    }

    /// Update an existing dataset.
    ///
    /// Refuses the update when the incoming document differs from the
    /// stored one in an unsafe way, unless `allow_unsafe` is set.
    pub async fn update_dataset(&self, dataset: &Dataset, allow_unsafe: bool) -> DcResult<()> {
        let existing = self
            .get_dataset(dataset.id)
            .await?
            .ok_or(DcError::DatasetNotFound(dataset.id))?;

        if !allow_unsafe {
            let offending = unsafe_changes(&existing.metadata, &dataset.raw);
            if let Some(change) = offending.first() {
                return Err(DcError::UnsafeChange(change.dotted_path()));
            }
        }

        sqlx::query(
            "UPDATE datasets SET metadata = $2, uri = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(dataset.id)
        .bind(&dataset.raw)
        .bind(&dataset.uri)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| DcError::DatabaseError(format!("Update failed: {}", e)))?;

        debug!(id = %dataset.id, "Updated dataset");
        Ok(())
    }

    /// Archive a dataset. The dataset must exist and be active.
    pub async fn archive_dataset(&self, id: Uuid) -> DcResult<()> {
        let result = sqlx::query(
            "UPDATE datasets SET status = $2, archived_at = $3 \
             WHERE id = $1 AND status = $4",
        )
        .bind(id)
        .bind(STATUS_ARCHIVED)
        .bind(Utc::now())
        .bind(STATUS_ACTIVE)
        .execute(&self.pool)
        .await
        .map_err(|e| DcError::DatabaseError(format!("Update failed: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DcError::DatasetNotFound(id));
        }

        debug!(id = %id, "Archived dataset");
        Ok(())
    }

    /// Restore a previously archived dataset.
    pub async fn restore_dataset(&self, id: Uuid) -> DcResult<()> {
        let result = sqlx::query(
            "UPDATE datasets SET status = $2, archived_at = NULL \
             WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(STATUS_ACTIVE)
        .bind(STATUS_ARCHIVED)
        .execute(&self.pool)
        .await
        .map_err(|e| DcError::DatabaseError(format!("Update failed: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DcError::DatasetNotFound(id));
        }

        Ok(())
    }
}

/// A dataset as stored in the catalog.
#[derive(Debug, Clone)]
pub struct StoredDataset {
    pub id: Uuid,
    pub product: String,
    pub metadata: Value,
    pub uri: String,
    pub status: String,
    pub added_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl StoredDataset {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// Internal row type for database queries.
#[derive(FromRow)]
struct DatasetRow {
    id: Uuid,
    product: String,
    metadata: Value,
    uri: String,
    status: String,
    added_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    archived_at: Option<DateTime<Utc>>,
}

impl From<DatasetRow> for StoredDataset {
    fn from(row: DatasetRow) -> Self {
        StoredDataset {
            id: row.id,
            product: row.product,
            metadata: row.metadata,
            uri: row.uri,
            status: row.status,
            added_at: row.added_at,
            updated_at: row.updated_at,
            archived_at: row.archived_at,
        }
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    name VARCHAR(200) PRIMARY KEY,
    definition JSONB NOT NULL,
    added_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS datasets (
    id UUID PRIMARY KEY,
    product VARCHAR(200) NOT NULL,
    metadata JSONB NOT NULL,
    uri TEXT NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'active',
    added_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ,
    archived_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_datasets_product ON datasets(product);
CREATE INDEX IF NOT EXISTS idx_datasets_status ON datasets(status);

CREATE TABLE IF NOT EXISTS dataset_sources (
    dataset_id UUID NOT NULL REFERENCES datasets(id),
    source_id UUID NOT NULL,
    PRIMARY KEY (dataset_id, source_id)
);
"#;
