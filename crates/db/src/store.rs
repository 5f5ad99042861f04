//! Postgres implementation of the import store traits.
//!
//! Table and column names come from validated schema descriptors and are
//! interpolated into SQL directly:
//! - entity type `t` is table `t` with a `BIGSERIAL id`
//! - single relation `f` is column `f_id`
//! - multi relation `f` of `t` is link table `t_f (owner_id, related_id)`
//! - a natural key column must carry a unique constraint
//!
//! Outside a row savepoint, get-or-create runs under its own short savepoint
//! so a rejected key fails only its row.

use async_trait::async_trait;
use rowbridge_core::error::StoreError;
use rowbridge_core::schema::{RelationTarget, SchemaDescriptor};
use rowbridge_core::store::{
    prepare_record, ColumnValue, EntityStore, FieldValues, ImportTarget, RelationIds,
    TransactionScope,
};
use rowbridge_core::types::DbId;
use rowbridge_core::value::TypedValue;
use sqlx::{PgPool, Postgres, Transaction};

const SAVEPOINT_NAME: &str = "import_row";

/// Wraps a single get-or-create when no row savepoint is open.
const KEY_SAVEPOINT_NAME: &str = "import_key";

/// Column that stores a single relation.
pub fn relation_column(field: &str) -> String {
    format!("{field}_id")
}

/// Link table of a multi relation.
pub fn link_table(owner_type: &str, field: &str) -> String {
    format!("{owner_type}_{field}")
}

/// Map a sqlx error to the store taxonomy.
///
/// Connection-level failures are always fatal. Database errors are scoped
/// to the statement; the caller decides whether they poison the scope.
pub fn classify_sqlx_error(err: &sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            let detail = match db_err.constraint() {
                Some(constraint) => format!("{} ({constraint})", db_err.message()),
                None => db_err.message().to_string(),
            };
            // Class 23: integrity constraint violation.
            if code.starts_with("23") {
                StoreError::Constraint(detail)
            } else {
                StoreError::Storage(detail)
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Fatal(err.to_string()),
        other => StoreError::Storage(other.to_string()),
    }
}

/// Imports into Postgres, one transaction per batch.
#[derive(Debug, Clone)]
pub struct PgImportTarget {
    pool: PgPool,
}

impl PgImportTarget {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportTarget for PgImportTarget {
    type Scope = PgImportScope;

    async fn begin(&self) -> Result<PgImportScope, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))?;
        Ok(PgImportScope {
            tx,
            savepoint_open: false,
            poisoned: false,
        })
    }
}

/// An open batch transaction.
///
/// Postgres aborts a transaction after any failed statement. Without an
/// open savepoint the scope is then poisoned and every later call returns
/// [`StoreError::Fatal`].
pub struct PgImportScope {
    tx: Transaction<'static, Postgres>,
    savepoint_open: bool,
    poisoned: bool,
}

impl PgImportScope {
    fn ensure_usable(&self) -> Result<(), StoreError> {
        if self.poisoned {
            return Err(StoreError::Fatal(
                "transaction aborted by an earlier failed statement".into(),
            ));
        }
        Ok(())
    }

    fn fail(&mut self, err: sqlx::Error) -> StoreError {
        let classified = classify_sqlx_error(&err);
        if classified.is_fatal() || self.savepoint_open {
            return classified;
        }
        self.poisoned = true;
        tracing::warn!(error = %err, "Statement failed outside a savepoint, transaction poisoned");
        StoreError::Fatal(classified.to_string())
    }

    async fn fetch_id(&mut self, sql: &str, key: &str) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(sql)
            .bind(key)
            .fetch_one(&mut *self.tx)
            .await
    }

    async fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        self.ensure_usable()?;
        let result = sqlx::query(sql).execute(&mut *self.tx).await;
        result.map(|_| ()).map_err(|e| self.fail(e))
    }
}

#[async_trait]
impl EntityStore for PgImportScope {
    async fn create(
        &mut self,
        schema: &SchemaDescriptor,
        scalars: &FieldValues,
        relations: &RelationIds,
    ) -> Result<DbId, StoreError> {
        self.ensure_usable()?;
        let columns = prepare_record(schema, scalars, relations)?;

        let mut names = Vec::with_capacity(columns.len());
        let mut placeholders = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            let n = i + 1;
            match &column.value {
                ColumnValue::Relation(_) => {
                    names.push(relation_column(&column.field.name));
                    placeholders.push(format!("${n}"));
                }
                ColumnValue::Scalar(TypedValue::Decimal(_)) => {
                    names.push(column.field.name.clone());
                    placeholders.push(format!("${n}::numeric"));
                }
                ColumnValue::Scalar(_) => {
                    names.push(column.field.name.clone());
                    placeholders.push(format!("${n}"));
                }
            }
        }
        let table = schema.entity_type();
        let sql = if names.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES RETURNING id")
        } else {
            format!(
                "INSERT INTO {table} ({}) VALUES ({}) RETURNING id",
                names.join(", "),
                placeholders.join(", ")
            )
        };

        let mut query = sqlx::query_scalar::<_, DbId>(&sql);
        for column in &columns {
            query = match &column.value {
                ColumnValue::Relation(id) => query.bind(*id),
                ColumnValue::Scalar(TypedValue::Text(s))
                | ColumnValue::Scalar(TypedValue::Decimal(s)) => query.bind(s.clone()),
                ColumnValue::Scalar(TypedValue::Integer(i)) => query.bind(*i),
                ColumnValue::Scalar(TypedValue::Boolean(b)) => query.bind(*b),
                ColumnValue::Scalar(TypedValue::Null) => query.bind(None::<String>),
            };
        }

        let result = query.fetch_one(&mut *self.tx).await;
        match result {
            Ok(id) => {
                tracing::debug!(entity_type = table, id, "Created entity");
                Ok(id)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn get_or_create_by_key(
        &mut self,
        target: &RelationTarget,
        key: &str,
    ) -> Result<DbId, StoreError> {
        self.ensure_usable()?;
        let table = &target.entity_type;
        let column = &target.natural_key;
        // DO UPDATE instead of DO NOTHING so RETURNING yields the existing row.
        let sql = format!(
            "INSERT INTO {table} ({column}) VALUES ($1) \
             ON CONFLICT ({column}) DO UPDATE SET {column} = EXCLUDED.{column} \
             RETURNING id"
        );

        if self.savepoint_open {
            let result = self.fetch_id(&sql, key).await;
            return result.map_err(|e| self.fail(e));
        }

        self.execute(&format!("SAVEPOINT {KEY_SAVEPOINT_NAME}")).await?;
        match self.fetch_id(&sql, key).await {
            Ok(id) => {
                self.execute(&format!("RELEASE SAVEPOINT {KEY_SAVEPOINT_NAME}"))
                    .await?;
                Ok(id)
            }
            Err(e) => {
                let classified = classify_sqlx_error(&e);
                if classified.is_fatal() {
                    return Err(classified);
                }
                tracing::debug!(
                    entity_type = %table,
                    error = %e,
                    "Get-or-create rejected, rolling back key savepoint"
                );
                self.execute(&format!("ROLLBACK TO SAVEPOINT {KEY_SAVEPOINT_NAME}"))
                    .await?;
                self.execute(&format!("RELEASE SAVEPOINT {KEY_SAVEPOINT_NAME}"))
                    .await?;
                Err(classified)
            }
        }
    }

    async fn link(
        &mut self,
        owner_type: &str,
        owner_id: DbId,
        relation_field: &str,
        related: &[DbId],
    ) -> Result<(), StoreError> {
        self.ensure_usable()?;
        let table = link_table(owner_type, relation_field);

        let delete = format!("DELETE FROM {table} WHERE owner_id = $1");
        let deleted = sqlx::query(&delete)
            .bind(owner_id)
            .execute(&mut *self.tx)
            .await;
        if let Err(e) = deleted {
            return Err(self.fail(e));
        }
        if related.is_empty() {
            return Ok(());
        }

        let insert = format!(
            "INSERT INTO {table} (owner_id, related_id) \
             SELECT $1, UNNEST($2::bigint[]) \
             ON CONFLICT DO NOTHING"
        );
        let inserted = sqlx::query(&insert)
            .bind(owner_id)
            .bind(related.to_vec())
            .execute(&mut *self.tx)
            .await;
        inserted.map(|_| ()).map_err(|e| self.fail(e))
    }
}

#[async_trait]
impl TransactionScope for PgImportScope {
    async fn savepoint(&mut self) -> Result<(), StoreError> {
        if self.savepoint_open {
            return Err(StoreError::Fatal("savepoint already open".into()));
        }
        self.execute(&format!("SAVEPOINT {SAVEPOINT_NAME}")).await?;
        self.savepoint_open = true;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        if !self.savepoint_open {
            return Err(StoreError::Fatal("no savepoint to release".into()));
        }
        self.savepoint_open = false;
        self.execute(&format!("RELEASE SAVEPOINT {SAVEPOINT_NAME}"))
            .await
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        if !self.savepoint_open {
            return Err(StoreError::Fatal("no savepoint to roll back to".into()));
        }
        // Rolling back clears the aborted state of the transaction.
        self.poisoned = false;
        self.execute(&format!("ROLLBACK TO SAVEPOINT {SAVEPOINT_NAME}"))
            .await?;
        self.savepoint_open = false;
        self.execute(&format!("RELEASE SAVEPOINT {SAVEPOINT_NAME}"))
            .await
    }

    async fn commit(self) -> Result<(), StoreError> {
        // Postgres turns COMMIT of an aborted transaction into ROLLBACK.
        if self.poisoned {
            return Err(StoreError::Fatal(
                "cannot commit: transaction aborted by an earlier failed statement".into(),
            ));
        }
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))
    }
}
