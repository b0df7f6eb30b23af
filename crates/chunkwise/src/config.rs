use serde::Deserialize;

use chunkwise_backend_postgres::PgS3SqsConfig;
use chunkwise_core::RetryProfiles;
use chunkwise_http::HttpConfig;

#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    pub backend: UploadBackend,
    #[serde(default)]
    pub retry: RetryProfiles,
    #[serde(default)]
    pub http: HttpConfig,
    pub static_sessions: Option<Vec<SessionDefinition>>,
}

fn default_listen_address() -> String {
    String::from("0.0.0.0:13030")
}

#[derive(Clone, Deserialize)]
#[serde(tag = "type")]
pub enum UploadBackend {
    PgS3Sqs(PgS3SqsConfig),
}

/// Upload session registered at startup if it doesn't already exist.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SessionDefinition {
    pub upload_id: String,
    pub total_chunks: u32,
}
