//! [`ObjectStoreClient`] backed by the official `aws-sdk-s3` crate.
//!
//! The signing region comes from the instance endpoint table. Setting an
//! endpoint URL override points the client at any S3-compatible service
//! (MinIO, LocalStack) with path-style addressing.

use super::object_store::{
    ListPage, ListRequest, ObjectBody, ObjectStoreClient, PutRequest, StoreError, StoreResult,
};
use crate::models::{
    instance::InstanceConfig,
    listing::{ObjectEntry, PrefixEntry},
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{
    Client,
    config::Credentials,
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{ObjectCannedAcl, StorageClass as SdkStorageClass},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::DateTime;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

const CREDENTIALS_PROVIDER_NAME: &str = "s3bucket-repository";

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client for an instance. Loads configuration only; no request
    /// is sent until the first operation.
    ///
    /// Without an access key the default AWS credential chain applies
    /// (environment, shared profile, instance role).
    pub async fn connect(config: &InstanceConfig, endpoint_url: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.endpoint.region()));

        if let Some(access_key) = &config.access_key {
            let credentials = Credentials::new(
                access_key,
                config.secret_key.clone().unwrap_or_default(),
                None,
                None,
                CREDENTIALS_PROVIDER_NAME,
            );
            loader = loader.credentials_provider(credentials);
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(url) = endpoint_url {
            builder = builder.endpoint_url(url).force_path_style(true);
        }

        debug!(
            "S3 client ready for bucket {} in {}",
            config.bucket_name,
            config.endpoint.region()
        );
        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

fn sdk_error(err: impl std::error::Error) -> StoreError {
    StoreError::new(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    async fn list_objects(&self, request: ListRequest) -> StoreResult<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&request.bucket)
            .prefix(&request.prefix)
            .delimiter(&request.delimiter)
            .set_continuation_token(request.continuation_token)
            .send()
            .await
            .map_err(sdk_error)?;

        let prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|cp| cp.prefix())
            .map(|prefix| PrefixEntry {
                prefix: prefix.to_string(),
            })
            .collect();

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?;
                Some(ObjectEntry {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                })
            })
            .collect();

        let next_continuation_token = if output.is_truncated() == Some(true) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            prefixes,
            objects,
            next_continuation_token,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(Box::pin(ReaderStream::new(output.body.into_async_read())))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        content_disposition: Option<String>,
    ) -> StoreResult<String> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StoreError::new(format!("invalid presigning config: {}", e)))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_response_content_disposition(content_disposition)
            .presigned(presigning)
            .await
            .map_err(sdk_error)?;

        Ok(presigned.uri().to_string())
    }

    async fn head_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn put_object(&self, request: PutRequest) -> StoreResult<()> {
        let content_md5 = general_purpose::STANDARD.encode(md5::compute(&request.body).0);
        self.client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .storage_class(SdkStorageClass::from(request.storage_class.as_str()))
            .acl(ObjectCannedAcl::Private)
            .content_md5(content_md5)
            .body(ByteStream::from(request.body))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}
