use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use http::Uri;
use serde::Deserialize;

pub(crate) mod logging;
use super::errors::Result;
use super::s3::logging::LoggingInterceptor;
use super::Key;
use super::ObjectStore;

#[derive(Clone, Deserialize)]
pub struct S3Config {
    secret_key: String,
    access_key: String,
    hostname: String,
    bucket_name: String,
    region: String,
}

impl S3Config {
    pub async fn new_objects(&self) -> Result<S3> {
        let scp = SharedCredentialsProvider::new(
            Credentials::new(
                self.access_key.clone(),
                self.secret_key.clone(),
                None,
                None,
                "chunkwise",
            )
            .provide_credentials()
            .await?,
        );

        let uri = Uri::builder()
            .scheme("https")
            .authority(self.hostname.as_str())
            .path_and_query("/")
            .build()?;

        let sdk_config = aws_config::load_from_env().await;

        // retries are driven by the caller's retry policy so they can observe cancellation
        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .region(Region::new(self.region.clone()))
            .credentials_provider(scp)
            .endpoint_url(uri.to_string())
            .retry_config(RetryConfig::disabled())
            .interceptor(LoggingInterceptor)
            .build();

        let s3_client = aws_sdk_s3::Client::from_conf(config);

        tracing::info!(
            bucket = self.bucket_name.as_str(),
            endpoint = %uri,
            "configured s3 object store"
        );
        Ok(S3 {
            bucket_name: self.bucket_name.clone(),
            client: s3_client,
        })
    }
}

#[derive(Clone)]
pub struct S3 {
    bucket_name: String,
    client: Client,
}

#[async_trait]
impl ObjectStore for S3 {
    async fn put(&self, key: &Key, body: Bytes) -> Result<()> {
        let content_length = body.len() as i64;
        let _put_object_output = self
            .client
            .put_object()
            .key(String::from(key))
            .body(ByteStream::from(body))
            .content_length(content_length)
            .bucket(&self.bucket_name)
            .send()
            .await?;
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        let _head_bucket_output = self
            .client
            .head_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await?;
        Ok(())
    }
}
