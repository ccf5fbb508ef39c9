//! AWS SDK S3 client implementation.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::debug;

use super::{ObjectStore, StorageError, StoredObject, WriteCondition};
use crate::config::StorageConfig;
use crate::metadata::ObjectMetadata;

/// Error codes S3 returns for throttling, server-side hiccups and
/// transient write conflicts.
const TRANSIENT_CODES: &[&str] = &[
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "SlowDown",
    "InternalError",
    "ServiceUnavailable",
    "Throttling",
    "ThrottlingException",
    "OperationAborted",
    "ConditionalRequestConflict",
];

/// Error code for a conditional write whose precondition did not hold.
const PRECONDITION_CODE: &str = "PreconditionFailed";

/// Error code for a missing object. `NoSuchBucket` and friends are not it.
const NO_SUCH_KEY_CODE: &str = "NoSuchKey";

/// [`ObjectStore`] backed by the AWS SDK for Rust.
///
/// SDK-level retries are disabled; callers retry with their own
/// [`RetryPolicy`](crate::upload::RetryPolicy) so that every attempt is
/// visible in the logs and counted in upload outcomes.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    /// Create a store using the default credential chain.
    ///
    /// # Arguments
    ///
    /// * `config` - Endpoint, region and addressing overrides
    pub async fn connect(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).retry_config(RetryConfig::disabled());
        if let Some(url) = &config.endpoint_url {
            debug!(endpoint = %url, "Using custom storage endpoint");
            builder = builder.endpoint_url(url);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: S3Client::from_conf(builder.build()),
        }
    }

    /// Wrap an already configured SDK client.
    pub fn from_client(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::LocalRead {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body);
        if let Some(content_type) = metadata.content_type {
            request = request.content_type(content_type);
        }
        if let Some(encoding) = metadata.content_encoding {
            request = request.content_encoding(encoding);
        }
        if let Some(cache_control) = metadata.cache_control {
            request = request.cache_control(cache_control);
        }

        request
            .send()
            .await
            .map_err(|err| classify(bucket, key, err))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StorageError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    classify(bucket, key, err)
                }
            })?;

        let etag = response.e_tag().map(str::to_string);
        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Request {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: e.to_string(),
                retryable: true,
            })?
            .into_bytes()
            .to_vec();

        Ok(StoredObject { body, etag })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
        condition: WriteCondition,
    ) -> Result<(), StorageError> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body));
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }
        request = match condition {
            WriteCondition::Unconditional => request,
            WriteCondition::IfMatch(etag) => request.if_match(etag),
            WriteCondition::IfAbsent => request.if_none_match("*"),
        };

        request
            .send()
            .await
            .map_err(|err| classify(bucket, key, err))?;
        Ok(())
    }
}

/// Map an SDK error onto the storage error taxonomy.
fn classify<E>(bucket: &str, key: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    let code = err.code().map(str::to_string);
    let transport = matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
    );
    let message = DisplayErrorContext(&err).to_string();

    classify_response(bucket, key, status, code.as_deref(), transport, message)
}

/// Classify a failed request from its HTTP status and S3 error code.
///
/// `transport` is set when no usable response arrived (timeout, connection
/// failure, unparseable response).
fn classify_response(
    bucket: &str,
    key: &str,
    status: Option<u16>,
    code: Option<&str>,
    transport: bool,
    message: String,
) -> StorageError {
    let not_found = match code {
        Some(code) => code == NO_SUCH_KEY_CODE,
        None => status == Some(404),
    };
    if not_found {
        return StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
    }

    if status == Some(412) || code == Some(PRECONDITION_CODE) {
        return StorageError::PreconditionFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
    }

    let retryable = transport
        || matches!(status, Some(s) if s == 409 || s == 429 || s >= 500)
        || code.map(|c| TRANSIENT_CODES.contains(&c)).unwrap_or(false);

    StorageError::Request {
        bucket: bucket.to_string(),
        key: key.to_string(),
        message,
        retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_status(status: u16, code: Option<&str>) -> StorageError {
        classify_response("b", "k", Some(status), code, false, "failed".to_string())
    }

    #[tokio::test]
    async fn test_connect_with_custom_endpoint() {
        let config = StorageConfig::default()
            .with_endpoint_url("http://localhost:9000")
            .with_region("us-east-1");
        let store = S3Store::connect(&config).await;

        let conf = store.client.config();
        assert_eq!(conf.region().map(|r| r.as_ref()), Some("us-east-1"));
    }

    #[tokio::test]
    async fn test_from_client_keeps_client_config() {
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-central-1"))
            .retry_config(RetryConfig::disabled())
            .build();
        let store = S3Store::from_client(S3Client::from_conf(conf));
        assert_eq!(
            store.client.config().region().map(|r| r.as_ref()),
            Some("eu-central-1")
        );
    }

    #[test]
    fn test_no_such_key_is_not_found() {
        assert!(classify_status(404, Some("NoSuchKey")).is_not_found());
        // HEAD-style 404 without a body carries no code.
        assert!(classify_status(404, None).is_not_found());
    }

    #[test]
    fn test_no_such_bucket_is_not_missing_object() {
        let err = classify_status(404, Some("NoSuchBucket"));
        assert!(!err.is_not_found());
        assert!(!err.is_retryable());
        assert!(matches!(err, StorageError::Request { .. }));
    }

    #[test]
    fn test_precondition_failed() {
        assert!(matches!(
            classify_status(412, Some("PreconditionFailed")),
            StorageError::PreconditionFailed { .. }
        ));
        assert!(matches!(
            classify_status(412, None),
            StorageError::PreconditionFailed { .. }
        ));
    }

    #[test]
    fn test_409_conflicts_are_retried() {
        for code in ["ConditionalRequestConflict", "OperationAborted"] {
            let err = classify_status(409, Some(code));
            assert!(
                matches!(err, StorageError::Request { .. }),
                "{} should not be a precondition failure",
                code
            );
            assert!(err.is_retryable(), "{} should be retryable", code);
        }
    }

    #[test]
    fn test_throttling_and_server_errors_are_retried() {
        assert!(classify_status(503, Some("SlowDown")).is_retryable());
        assert!(classify_status(500, Some("InternalError")).is_retryable());
        assert!(classify_status(429, None).is_retryable());
        assert!(classify_status(400, Some("RequestTimeout")).is_retryable());
    }

    #[test]
    fn test_client_errors_are_permanent() {
        assert!(!classify_status(403, Some("AccessDenied")).is_retryable());
        assert!(!classify_status(400, Some("InvalidArgument")).is_retryable());
    }

    #[test]
    fn test_transport_failure_is_retried() {
        let err = classify_response("b", "k", None, None, true, "timeout".to_string());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timeout"));
    }
}
