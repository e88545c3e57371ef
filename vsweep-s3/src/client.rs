//! S3 implementation of the engine's `BucketClient` seam.

use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::types::{
    Delete, ObjectIdentifier, ObjectLockRetention, ObjectLockRetentionMode,
};
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response as HttpResponse;
use chrono::{DateTime, Utc};
use vsweep_core::ObjectVersion;
use vsweep_engine::{
    BucketClient, ClientError, ClientResult, DeleteItemError, DeleteOutcome, DeletedObject,
    ListCursor, ListedTombstone, ListedVersion, VersionListPage,
};

use crate::address::BucketAddress;

/// Region assumed for custom endpoints, which ignore it anyway.
const ENDPOINT_DEFAULT_REGION: &str = "us-east-1";

/// S3-backed [`BucketClient`].
#[derive(Debug, Clone)]
pub struct S3BucketClient {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3BucketClient {
    /// Creates a client for `address` on top of the shared AWS
    /// configuration.
    ///
    /// URL addresses pin their endpoint with path-style addressing, which
    /// S3-compatible services require; bare names go through the standard
    /// AWS resolution chain.
    #[must_use]
    pub fn from_config(config: &aws_config::SdkConfig, address: &BucketAddress) -> Self {
        let mut builder = aws_sdk_s3::config::Builder::from(config);

        if let Some(endpoint) = address.endpoint() {
            builder = builder
                .endpoint_url(endpoint)
                .force_path_style(true)
                .region(Region::new(ENDPOINT_DEFAULT_REGION));
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: address.bucket().to_string(),
            prefix: address.prefix().to_string(),
        }
    }

    /// Creates a client from an existing SDK client, for pre-configured
    /// setups.
    #[must_use]
    pub fn from_client(
        client: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub(crate) const fn client(&self) -> &aws_sdk_s3::Client {
        &self.client
    }
}

#[async_trait]
impl BucketClient for S3BucketClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn list_object_versions(
        &self,
        cursor: Option<ListCursor>,
    ) -> ClientResult<VersionListPage> {
        let mut request = self
            .client
            .list_object_versions()
            .bucket(&self.bucket)
            .prefix(&self.prefix);

        if let Some(cursor) = cursor {
            request = request
                .key_marker(cursor.key_marker)
                .version_id_marker(cursor.version_id_marker);
        }

        let response = request
            .send()
            .await
            .map_err(|err| api_error("ListObjectVersions", &err))?;

        let mut page = VersionListPage::default();

        for v in response.versions.unwrap_or_default() {
            page.versions.push(ListedVersion {
                key: v.key.unwrap_or_default(),
                version_id: v.version_id.unwrap_or_default(),
                last_modified: to_chrono(v.last_modified),
                is_latest: v.is_latest.unwrap_or(false),
                size: v.size.unwrap_or(0).max(0).unsigned_abs(),
            });
        }

        for marker in response.delete_markers.unwrap_or_default() {
            page.delete_markers.push(ListedTombstone {
                key: marker.key.unwrap_or_default(),
                version_id: marker.version_id.unwrap_or_default(),
                last_modified: to_chrono(marker.last_modified),
                is_latest: marker.is_latest.unwrap_or(false),
            });
        }

        if response.is_truncated.unwrap_or(false) {
            page.next = Some(ListCursor {
                key_marker: response.next_key_marker.unwrap_or_default(),
                version_id_marker: response.next_version_id_marker.unwrap_or_default(),
            });
        }

        Ok(page)
    }

    async fn get_object_retention(
        &self,
        key: &str,
        version_id: &str,
    ) -> ClientResult<Option<DateTime<Utc>>> {
        let response = self
            .client
            .get_object_retention()
            .bucket(&self.bucket)
            .key(key)
            .version_id(version_id)
            .send()
            .await;

        match response {
            Ok(output) => Ok(output
                .retention
                .and_then(|retention| retention.retain_until_date)
                .map(|until| to_chrono(Some(until)))),
            Err(err) if is_not_found_error(&err) => Err(ClientError::NotFound {
                key: key.to_string(),
                version_id: version_id.to_string(),
            }),
            Err(err) => Err(api_error("GetObjectRetention", &err)),
        }
    }

    async fn put_object_retention(
        &self,
        key: &str,
        version_id: &str,
        until: DateTime<Utc>,
    ) -> ClientResult<()> {
        // Governance mode: the tool only ever moves retention forward, so
        // governance never needs a bypass, and operators keep an escape
        // hatch that compliance mode would remove.
        let retention = ObjectLockRetention::builder()
            .mode(ObjectLockRetentionMode::Governance)
            .retain_until_date(aws_smithy_types::DateTime::from_secs(until.timestamp()))
            .build();

        let response = self
            .client
            .put_object_retention()
            .bucket(&self.bucket)
            .key(key)
            .version_id(version_id)
            .retention(retention)
            .send()
            .await;

        match response {
            Ok(_) => Ok(()),
            Err(err) if is_not_found_error(&err) => Err(ClientError::NotFound {
                key: key.to_string(),
                version_id: version_id.to_string(),
            }),
            Err(err) => Err(api_error("PutObjectRetention", &err)),
        }
    }

    async fn delete_objects(&self, objects: &[ObjectVersion]) -> ClientResult<DeleteOutcome> {
        let mut identifiers = Vec::with_capacity(objects.len());

        for object in objects {
            let identifier = ObjectIdentifier::builder()
                .key(object.key.as_ref())
                .version_id(&object.version_id)
                .build()
                .map_err(|err| ClientError::Api {
                    operation: "DeleteObjects",
                    message: format!("building object identifier: {err}"),
                })?;

            identifiers.push(identifier);
        }

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .build()
            .map_err(|err| ClientError::Api {
                operation: "DeleteObjects",
                message: format!("building delete request: {err}"),
            })?;

        let response = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| api_error("DeleteObjects", &err))?;

        let mut outcome = DeleteOutcome::default();

        for deleted in response.deleted.unwrap_or_default() {
            outcome.deleted.push(DeletedObject {
                key: deleted.key.unwrap_or_default(),
                version_id: deleted.version_id.unwrap_or_default(),
            });
        }

        for error in response.errors.unwrap_or_default() {
            outcome.errors.push(DeleteItemError {
                key: error.key.unwrap_or_default(),
                version_id: error.version_id.unwrap_or_default(),
                code: error.code.unwrap_or_default(),
                message: error.message.unwrap_or_default(),
            });
        }

        Ok(outcome)
    }
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

pub(crate) fn to_chrono(t: Option<aws_smithy_types::DateTime>) -> DateTime<Utc> {
    t.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

pub(crate) fn api_error<E>(
    operation: &'static str,
    err: &SdkError<E, HttpResponse>,
) -> ClientError
where
    E: std::error::Error,
{
    ClientError::Api {
        operation,
        message: format!("{err}"),
    }
}

/// Checks if an AWS SDK error indicates a "not found" condition.
pub(crate) fn is_not_found_error<E>(err: &SdkError<E, HttpResponse>) -> bool {
    match err {
        SdkError::ServiceError(service_err) => {
            // The raw HTTP response carries the status code.
            service_err.raw().status().as_u16() == 404
        }
        _ => false,
    }
}
