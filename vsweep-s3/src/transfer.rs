//! Object transfer for cache persistence.
//!
//! The retention cache snapshot lives as a single object in the
//! persistence bucket; these helpers move it whole, in memory. Snapshots
//! are small relative to the version listings the cache saves.

use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use vsweep_engine::{BucketClient, ClientError, ClientResult};

use crate::client::{api_error, is_not_found_error, S3BucketClient};

impl S3BucketClient {
    /// Downloads one object into memory.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] when the object does not exist
    /// and [`ClientError::Api`] for other failures.
    pub async fn download_object(&self, key: &str) -> ClientResult<Bytes> {
        let response = self
            .client()
            .get_object()
            .bucket(self.bucket())
            .key(key)
            .send()
            .await;

        let output = match response {
            Ok(output) => output,
            Err(err) if is_not_found_error(&err) => {
                return Err(ClientError::NotFound {
                    key: key.to_string(),
                    version_id: String::new(),
                })
            }
            Err(err) => return Err(api_error("GetObject", &err)),
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|err| ClientError::Api {
                operation: "GetObject",
                message: format!("reading response body: {err}"),
            })?
            .into_bytes();

        Ok(data)
    }

    /// Uploads one object from memory.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Api`] when the upload fails.
    pub async fn upload_object(&self, key: &str, data: Bytes) -> ClientResult<()> {
        self.client()
            .put_object()
            .bucket(self.bucket())
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| api_error("PutObject", &err))?;

        Ok(())
    }
}
