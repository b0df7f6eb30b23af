use axum::extract::rejection::{
    BytesRejection, PathRejection, TypedHeaderRejection, TypedHeaderRejectionReason,
};
use axum::extract::{Path, State, TypedHeader};
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::{Json, Router};
use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;

use chunkwise_core::ChunkUpload;

use super::deadline::Deadline;
use super::errors::{Error, Result};
use super::headers::XChunkHash;
use super::Chunkwise;

pub fn router() -> Router<Chunkwise> {
    Router::new().route("/upload/:upload_id/chunk/:chunk_id", put(put_chunk))
}

#[derive(Debug, Serialize)]
struct ChunkAccepted {
    upload_id: String,
    chunk_id: String,
    chunk_key: String,
}

async fn put_chunk(
    State(chunkwise): State<Chunkwise>,
    path: std::result::Result<Path<(String, String)>, PathRejection>,
    chunk_hash: std::result::Result<TypedHeader<XChunkHash>, TypedHeaderRejection>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Response> {
    let Path((upload_id, chunk_id)) = path?;
    // absence is reported by the coordinator, garbage here
    let chunk_hash = match chunk_hash {
        Ok(TypedHeader(XChunkHash(h))) => Some(h),
        Err(rejection) => match rejection.reason() {
            TypedHeaderRejectionReason::Missing => None,
            _ => return Err(Error::MalformedChunkHash),
        },
    };
    let body = body?;

    let deadline = Deadline::start(chunkwise.config.request_timeout());

    let request = ChunkUpload {
        upload_id,
        chunk_id,
        chunk_hash,
        body,
    };
    let receipt = chunkwise
        .coordinator
        .upload_chunk(request, deadline.token())
        .await?;

    Ok((
        StatusCode::OK,
        Json(ChunkAccepted {
            upload_id: receipt.upload_id.to_string(),
            chunk_id: receipt.chunk_index.to_string(),
            chunk_key: receipt.chunk_key.to_string(),
        }),
    )
        .into_response())
}
