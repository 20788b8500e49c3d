use crate::error::{AppResult, PortabilityError};
use crate::models::job::{AuthData, DataType, Job, JobId, JobRecord};
use crate::services::job_store::JobStore;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// SQLite-backed job store.
#[derive(Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn create(&self, job: &Job) -> AppResult<()> {
        let record = job.to_record();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, data_type, export_service, import_service,
                              export_initial_auth_data, export_auth_data,
                              import_initial_auth_data, import_auth_data,
                              created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(record.id.as_uuid().to_string())
        .bind(record.data_type.as_str())
        .bind(&record.export_service)
        .bind(&record.import_service)
        .bind(record.export_initial_auth_data.map(AuthData::into_inner))
        .bind(record.export_auth_data.map(AuthData::into_inner))
        .bind(record.import_initial_auth_data.map(AuthData::into_inner))
        .bind(record.import_auth_data.map(AuthData::into_inner))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                PortabilityError::Conflict(format!("Job already exists: {}", job.id()))
            }
            e => PortabilityError::Storage(format!("Failed to create job: {e}")),
        })?;

        Ok(())
    }

    async fn find(&self, id: &JobId) -> AppResult<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT id, data_type, export_service, import_service,
                   export_initial_auth_data, export_auth_data,
                   import_initial_auth_data, import_auth_data,
                   created_at, updated_at
            FROM jobs
            WHERE id = ?
            "#
        )
        .bind(id.as_uuid().to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortabilityError::Storage(format!("Failed to get job: {e}")))?;

        row.map(|row| job_from_row(&row)).transpose()
    }

    async fn update(&self, job: &Job) -> AppResult<()> {
        let mut tx = self.pool.begin().await
            .map_err(|e| PortabilityError::Storage(format!("Failed to start transaction: {e}")))?;

        // Selection columns are fixed at creation, so only auth data is written back.
        let record = job.to_record();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET export_initial_auth_data = ?, export_auth_data = ?,
                import_initial_auth_data = ?, import_auth_data = ?,
                updated_at = ?
            WHERE id = ?
            "#
        )
        .bind(record.export_initial_auth_data.map(AuthData::into_inner))
        .bind(record.export_auth_data.map(AuthData::into_inner))
        .bind(record.import_initial_auth_data.map(AuthData::into_inner))
        .bind(record.import_auth_data.map(AuthData::into_inner))
        .bind(record.updated_at)
        .bind(record.id.as_uuid().to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| PortabilityError::Storage(format!("Failed to update job: {e}")))?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(|e| {
                PortabilityError::Storage(format!("Failed to rollback transaction: {e}"))
            })?;
            return Err(PortabilityError::NotFound(format!("Job not found: {}", job.id())));
        }

        tx.commit().await
            .map_err(|e| PortabilityError::Storage(format!("Failed to commit transaction: {e}")))?;

        Ok(())
    }
}

fn job_from_row(row: &SqliteRow) -> AppResult<Job> {
    let column_error =
        |e: sqlx::Error| PortabilityError::Storage(format!("Failed to read job row: {e}"));

    let id: String = row.try_get("id").map_err(column_error)?;
    let id = Uuid::parse_str(&id)
        .map(JobId::from_uuid)
        .map_err(|e| PortabilityError::Storage(format!("Stored job id is not a UUID: {e}")))?;

    let data_type: String = row.try_get("data_type").map_err(column_error)?;
    let data_type = data_type
        .parse::<DataType>()
        .map_err(|e| PortabilityError::Storage(format!("Stored job {id} has {e}")))?;

    let auth = |column: &str| -> AppResult<Option<AuthData>> {
        let value: Option<String> = row.try_get(column).map_err(column_error)?;
        Ok(value.map(AuthData::new))
    };

    Ok(Job::from_record(JobRecord {
        id,
        data_type,
        export_service: row.try_get("export_service").map_err(column_error)?,
        import_service: row.try_get("import_service").map_err(column_error)?,
        export_initial_auth_data: auth("export_initial_auth_data")?,
        export_auth_data: auth("export_auth_data")?,
        import_initial_auth_data: auth("import_initial_auth_data")?,
        import_auth_data: auth("import_auth_data")?,
        created_at: row.try_get("created_at").map_err(column_error)?,
        updated_at: row.try_get("updated_at").map_err(column_error)?,
    }))
}
