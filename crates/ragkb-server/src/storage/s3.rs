//! S3-compatible backend (MinIO, AWS)

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
    Client,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use super::{config::StorageConfig, ObjectInfo, ObjectReader, ObjectStore, StorageError, StorageResult};

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    region: String,
}

impl S3ObjectStore {
    pub fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        debug!("Initializing S3 object store with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "ragkb-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            region: config.region.clone(),
        })
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!(bucket, "Created bucket");
                Ok(())
            },
            Err(e) => {
                let already_there = e.as_service_error().is_some_and(|se| {
                    se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists()
                });
                if already_there {
                    Ok(())
                } else {
                    Err(classify(e, &format!("create bucket {}", bucket)))
                }
            },
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                self.create_bucket(bucket).await
            },
            Err(e) => Err(classify(e, &format!("head bucket {}", bucket))),
        }
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        request
            .send()
            .await
            .map_err(|e| classify(e, &format!("put s3://{}/{}", bucket, key)))?;

        debug!("Uploaded s3://{}/{}", bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        let head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    StorageError::not_found(bucket, key)
                } else {
                    classify(e, &format!("stat s3://{}/{}", bucket, key))
                }
            })?;

        Ok(ObjectInfo {
            size: head.content_length().unwrap_or(0).max(0) as u64,
            content_type: head.content_type().map(str::to_string),
            etag: head.e_tag().map(|t| t.trim_matches('"').to_string()),
            last_modified: head
                .last_modified()
                .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
        })
    }

    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::not_found(bucket, key)
                } else {
                    classify(e, &format!("get s3://{}/{}", bucket, key))
                }
            })?;

        Ok(Box::pin(response.body.into_async_read()))
    }
}

/// Map an SDK failure onto the storage error taxonomy.
///
/// Timeouts, dispatch failures, unparseable responses, throttling and 5xx are
/// transient. A bare 404 without a modeled service error is still not-found.
fn classify<E>(err: SdkError<E, HttpResponse>, what: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = format!("{}: {}", what, DisplayErrorContext(&err));

    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        },
        _ => status.is_some_and(|s| s >= 500 || s == 429),
    };

    if transient {
        StorageError::Unavailable(message)
    } else if status == Some(404) {
        StorageError::NotFound {
            bucket: String::new(),
            key: what.to_string(),
        }
    } else {
        StorageError::Backend(message)
    }
}
