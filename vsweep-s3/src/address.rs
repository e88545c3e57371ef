//! Bucket address parsing.

use thiserror::Error;
use url::{Position, Url};

/// Error parsing a bucket specifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The URL scheme is not `http` or `https`.
    #[error("unrecognized scheme {scheme:?}: {input}")]
    UnsupportedScheme {
        /// The offending scheme.
        scheme: String,
        /// The full specifier.
        input: String,
    },

    /// No bucket name could be extracted.
    #[error("missing bucket name: {input}")]
    MissingBucket {
        /// The full specifier.
        input: String,
    },
}

/// A parsed bucket specifier.
///
/// Either a bare bucket name, or `scheme://host[:port]/<bucket>[/<prefix>]`
/// pinning a custom endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketAddress {
    bucket: String,
    prefix: String,
    endpoint: Option<String>,
}

impl BucketAddress {
    /// Parses a bucket specifier.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] for URL specifiers with an unsupported
    /// scheme, and for specifiers without a bucket name.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        if let Ok(url) = Url::parse(input) {
            return Self::from_url(input, &url);
        }

        if input.is_empty() {
            return Err(AddressError::MissingBucket {
                input: input.to_string(),
            });
        }

        Ok(Self {
            bucket: input.to_string(),
            prefix: String::new(),
            endpoint: None,
        })
    }

    fn from_url(input: &str, url: &Url) -> Result<Self, AddressError> {
        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(AddressError::UnsupportedScheme {
                    scheme: scheme.to_string(),
                    input: input.to_string(),
                })
            }
        }

        let path = url.path().trim_start_matches('/');

        let (bucket, prefix) = match path.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix),
            None => (path, ""),
        };

        if bucket.is_empty() {
            return Err(AddressError::MissingBucket {
                input: input.to_string(),
            });
        }

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            endpoint: Some(url[..Position::BeforePath].to_string()),
        })
    }

    /// The bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The key prefix limiting enumeration; empty for the whole bucket.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Custom endpoint URL, if the specifier pinned one.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

impl std::fmt::Display for BucketAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.endpoint {
            Some(endpoint) if self.prefix.is_empty() => {
                write!(f, "{endpoint}/{}", self.bucket)
            }
            Some(endpoint) => write!(f, "{endpoint}/{}/{}", self.bucket, self.prefix),
            None => f.write_str(&self.bucket),
        }
    }
}
