use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::retry::RetryConfig;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use chunkwise_core::registry::{ReadinessCheck, UploadNotifier};
use chunkwise_core::{RetryProfiles, UploadId};

use super::errors::{Error, Result};

#[derive(Clone, Deserialize)]
pub struct SqsConfig {
    queue_url: String,
    region: String,
    access_key: String,
    secret_key: String,
    endpoint_url: Option<String>,
}

impl SqsConfig {
    pub async fn new_notifier(&self, retry: RetryProfiles) -> Result<SqsNotifier> {
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

        let sdk_config = aws_config::load_from_env().await;

        let mut builder = aws_sdk_sqs::config::Builder::from(&sdk_config)
            .region(Region::new(self.region.clone()))
            .credentials_provider(scp)
            .retry_config(RetryConfig::disabled());
        if let Some(endpoint_url) = &self.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        tracing::info!(queue_url = self.queue_url.as_str(), "configured sqs notifier");
        Ok(SqsNotifier {
            client: Client::from_conf(builder.build()),
            queue_url: self.queue_url.clone(),
            retry,
        })
    }
}

#[derive(Serialize)]
struct UploadCompleted<'a> {
    upload_id: &'a str,
}

fn completion_message(upload_id: &UploadId) -> Result<String> {
    Ok(serde_json::to_string(&UploadCompleted {
        upload_id: upload_id.as_str(),
    })?)
}

/// [`UploadNotifier`] sending to an SQS FIFO queue.
///
/// Each message is grouped by upload id and deduplicated on [`UploadId::deduplication_id`], so
/// resends inside the queue's deduplication window are dropped by SQS.
#[derive(Clone)]
pub struct SqsNotifier {
    client: Client,
    queue_url: String,
    retry: RetryProfiles,
}

impl SqsNotifier {
    async fn send(&self, upload_id: &UploadId, body: &str) -> Result<()> {
        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .message_group_id(upload_id.as_str())
            .message_deduplication_id(upload_id.deduplication_id())
            .send()
            .await?;
        tracing::debug!(message_id = ?output.message_id(), "sent completion message");
        Ok(())
    }
}

#[async_trait]
impl ReadinessCheck for SqsNotifier {
    fn name(&self) -> &'static str {
        "sqs"
    }

    async fn probe(&self, cancel: &CancellationToken) -> chunkwise_core::Result<()> {
        let this = self;
        self.retry
            .probe
            .run(
                cancel,
                move || async move {
                    this.client
                        .get_queue_attributes()
                        .queue_url(&this.queue_url)
                        .attribute_names(QueueAttributeName::QueueArn)
                        .send()
                        .await?;
                    Ok::<(), Error>(())
                },
                Error::is_transient,
            )
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}

#[async_trait]
impl UploadNotifier for SqsNotifier {
    async fn notify_upload_complete(
        &self,
        upload_id: &UploadId,
        cancel: &CancellationToken,
    ) -> chunkwise_core::Result<()> {
        let body = completion_message(upload_id)?;
        let body = body.as_str();
        let this = self;
        self.retry
            .data
            .run(
                cancel,
                move || async move { this.send(upload_id, body).await },
                Error::is_transient,
            )
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn completion_message_shape() {
        let upload_id = UploadId::try_from("abc-123").unwrap();
        assert_eq!(
            completion_message(&upload_id).unwrap(),
            r#"{"upload_id":"abc-123"}"#
        );
        assert_eq!(upload_id.deduplication_id(), "dedup-abc-123");
    }
}
