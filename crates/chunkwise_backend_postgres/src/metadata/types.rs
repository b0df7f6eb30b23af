use std::collections::BTreeSet;

use sea_query::Iden;
use sqlx::Row;

use chunkwise_core::{UploadId, UploadSession, UploadStatus};

#[derive(Iden)]
pub enum UploadSessions {
    Table,
    UploadId,
    TotalChunks,
    UploadedChunks,
    Status,
}

/// An `upload_sessions` row decoded into the core session model.
pub struct SessionRow(pub UploadSession);

fn decode_error(column: &str, e: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("{}", e).into(),
    }
}

impl sqlx::FromRow<'_, sqlx_postgres::PgRow> for SessionRow {
    fn from_row(row: &sqlx_postgres::PgRow) -> sqlx::Result<Self> {
        let upload_id = UploadId::try_from(row.try_get::<String, &str>("upload_id")?.as_str())
            .map_err(|e| decode_error("upload_id", e))?;
        let total_chunks = u32::try_from(row.try_get::<i32, &str>("total_chunks")?)
            .map_err(|e| decode_error("total_chunks", e))?;
        let uploaded_chunks = row
            .try_get::<Vec<i32>, &str>("uploaded_chunks")?
            .into_iter()
            .map(u32::try_from)
            .collect::<std::result::Result<BTreeSet<u32>, _>>()
            .map_err(|e| decode_error("uploaded_chunks", e))?;
        let status = row
            .try_get::<String, &str>("status")?
            .parse::<UploadStatus>()
            .map_err(|e| decode_error("status", e))?;

        Ok(SessionRow(UploadSession {
            upload_id,
            total_chunks,
            uploaded_chunks,
            status,
        }))
    }
}
