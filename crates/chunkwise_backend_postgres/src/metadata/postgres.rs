use sea_query::{Expr, OnConflict, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{PgConnection, Pool};

use chunkwise_core::{UploadId, UploadSession};

use super::super::errors::{Error, Result};
use super::types::{SessionRow, UploadSessions};

#[derive(Clone, Deserialize)]
pub struct PostgresConfig {
    connection_string: String,
    #[serde(default = "default_max_connections")]
    max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl PostgresConfig {
    pub async fn new_metadata(&self) -> Result<PostgresMetadataPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.connection_string)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(PostgresMetadataPool { pool })
    }
}

#[derive(Clone)]
pub struct PostgresMetadataPool {
    pool: Pool<Postgres>,
}

impl PostgresMetadataPool {
    pub async fn get_conn(&self) -> Result<PostgresMetadataConn> {
        Ok(PostgresMetadataConn {
            conn: self.pool.acquire().await?,
        })
    }
}

pub(crate) enum AddChunkOutcome {
    Added,
    AlreadyCompleted,
    OutOfRange(u32),
    NotFound,
}

pub struct PostgresMetadataConn {
    conn: PoolConnection<Postgres>,
}

impl PostgresMetadataConn {
    pub async fn get_session(&mut self, upload_id: &UploadId) -> Result<Option<UploadSession>> {
        Queries::get_session(&mut self.conn, upload_id).await
    }

    pub async fn insert_session(&mut self, upload_id: &UploadId, total_chunks: u32) -> Result<bool> {
        Queries::insert_session(&mut self.conn, upload_id, total_chunks).await
    }

    pub(crate) async fn add_chunk(
        &mut self,
        upload_id: &UploadId,
        chunk_index: u32,
    ) -> Result<AddChunkOutcome> {
        if let Ok(index) = i32::try_from(chunk_index) {
            if Queries::add_chunk(&mut self.conn, upload_id, index).await? {
                return Ok(AddChunkOutcome::Added);
            }
        }

        // the conditional update matched nothing; find out which condition failed
        Ok(match Queries::get_session(&mut self.conn, upload_id).await? {
            None => AddChunkOutcome::NotFound,
            Some(session) if session.is_completed() => AddChunkOutcome::AlreadyCompleted,
            Some(session) => AddChunkOutcome::OutOfRange(session.total_chunks),
        })
    }

    /// Complete the session if every chunk is present. `token` identifies the logical
    /// finalize call; repeating the call with the same token after its commit reports the win
    /// again instead of losing it.
    pub async fn try_finalize(
        &mut self,
        upload_id: &UploadId,
        total_chunks: u32,
        token: &str,
    ) -> Result<bool> {
        let total_chunks = match i32::try_from(total_chunks) {
            Ok(t) => t,
            Err(_) => return Ok(false),
        };
        Queries::try_finalize(&mut self.conn, upload_id, total_chunks, token).await
    }

    pub async fn ping(&mut self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&mut *self.conn).await?;
        Ok(())
    }
}

const ADD_CHUNK: &str = r#"
UPDATE upload_sessions
SET uploaded_chunks = CASE
        WHEN $2 = ANY(uploaded_chunks) THEN uploaded_chunks
        ELSE array_append(uploaded_chunks, $2)
    END,
    status = 'in_progress',
    updated_at = now()
WHERE upload_id = $1
  AND status <> 'completed'
  AND $2 >= 0
  AND $2 < total_chunks
"#;

const TRY_FINALIZE: &str = r#"
UPDATE upload_sessions
SET status = 'completed',
    finalized_by = $3,
    completed_at = COALESCE(completed_at, now()),
    updated_at = now()
WHERE upload_id = $1
  AND (
        (total_chunks = $2
         AND cardinality(uploaded_chunks) = $2
         AND status <> 'completed')
     OR finalized_by = $3
  )
"#;

// Queries that only require a `&mut PgConnection`.
//
// The two conditional updates are single statements: Postgres re-evaluates their WHERE clause
// against the latest committed row version after waiting on a concurrent writer's row lock, so
// concurrent `add_chunk` calls never lose an index and only one `try_finalize` can match.
struct Queries {}

impl Queries {
    async fn get_session(
        executor: &mut PgConnection,
        upload_id: &UploadId,
    ) -> Result<Option<UploadSession>> {
        let (sql, values) = Query::select()
            .from(UploadSessions::Table)
            .columns([
                UploadSessions::UploadId,
                UploadSessions::TotalChunks,
                UploadSessions::UploadedChunks,
                UploadSessions::Status,
            ])
            .and_where(Expr::col(UploadSessions::UploadId).eq(upload_id.as_str()))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_as_with::<_, SessionRow, _>(&sql, values)
            .fetch_optional(executor)
            .await?
            .map(|row| row.0))
    }

    async fn insert_session(
        executor: &mut PgConnection,
        upload_id: &UploadId,
        total_chunks: u32,
    ) -> Result<bool> {
        let total_chunks = match i32::try_from(total_chunks) {
            Ok(t) if t > 0 => t,
            _ => return Err(Error::InvalidTotalChunks(total_chunks)),
        };
        let (sql, values) = Query::insert()
            .into_table(UploadSessions::Table)
            .columns([UploadSessions::UploadId, UploadSessions::TotalChunks])
            .values([upload_id.as_str().into(), total_chunks.into()])?
            .on_conflict(
                OnConflict::column(UploadSessions::UploadId)
                    .do_nothing()
                    .to_owned(),
            )
            .build_sqlx(PostgresQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(executor).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_chunk(
        executor: &mut PgConnection,
        upload_id: &UploadId,
        chunk_index: i32,
    ) -> Result<bool> {
        let result = sqlx::query(ADD_CHUNK)
            .bind(upload_id.as_str())
            .bind(chunk_index)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_finalize(
        executor: &mut PgConnection,
        upload_id: &UploadId,
        total_chunks: i32,
        token: &str,
    ) -> Result<bool> {
        let result = sqlx::query(TRY_FINALIZE)
            .bind(upload_id.as_str())
            .bind(total_chunks)
            .bind(token)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
