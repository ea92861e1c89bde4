//! Short-lived download URLs for artifacts stored in S3.
//!
//! Test runs reference artifacts such as the `nodeadm` binary through locators like
//! `s3://my-bucket.s3.amazonaws.com/path/to/nodeadm`. Instances have no credentials to read the
//! bucket, so the locator is turned into a presigned URL that the boot script can `curl`.
use std::{fmt, str::FromStr, time::Duration};

use percent_encoding::percent_decode_str;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Validity of the presigned URL handed to freshly launched instances.
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("invalid S3 URL `{locator}`: {reason}")]
    Parse { locator: String, reason: String },

    #[error("generating pre-signed URL for `{location}`: {source}")]
    Signing {
        location: ObjectLocation,
        #[source]
        source: PresignError,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PresignError(pub String);

/// Storage backend able to sign time-bounded `GET` requests.
pub trait ObjectStore {
    fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, PresignError>;
}

/// Bucket and key of an S3 object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

impl FromStr for ObjectLocation {
    type Err = ArtifactError;

    /// The bucket is the first `.`-separated segment of the host, the key is the percent-decoded
    /// path without its leading `/`.
    fn from_str(locator: &str) -> Result<Self, Self::Err> {
        let parse_error = |reason: &str| ArtifactError::Parse {
            locator: locator.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(locator).map_err(|err| parse_error(&err.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| parse_error("missing host"))?;

        let Some((bucket, _)) = host.split_once('.') else {
            return Err(parse_error("host must be in the form <bucket>.<endpoint>"));
        };
        if bucket.is_empty() {
            return Err(parse_error("empty bucket name"));
        }

        let path = percent_decode_str(url.path())
            .decode_utf8()
            .map_err(|err| parse_error(&format!("object key is not valid UTF-8: {err}")))?;
        let key = path.strip_prefix('/').unwrap_or(&path);
        if key.is_empty() {
            return Err(parse_error("missing object key"));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// Turns S3 locators into presigned URLs. Expiry is enforced by S3 itself.
pub struct ArtifactLocator<S>
where
    S: ObjectStore,
{
    store: S,
}

impl<S> ArtifactLocator<S>
where
    S: ObjectStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn presigned_url(&self, locator: &str, ttl: Duration) -> Result<String, ArtifactError> {
        let location = ObjectLocation::from_str(locator)?;
        debug!(%location, ?ttl, "presigning artifact");
        self.store
            .presign_get(&location.bucket, &location.key, ttl)
            .map_err(|source| ArtifactError::Signing { location, source })
    }

    /// Presigned URL for the `nodeadm` binary, valid for [DEFAULT_URL_TTL].
    pub fn nodeadm_url(&self, locator: &str) -> Result<String, ArtifactError> {
        self.presigned_url(locator, DEFAULT_URL_TTL)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use assert_matches::assert_matches;
    use mockall::{mock, predicate};
    use rstest::rstest;

    use super::*;

    mock! {
        pub ObjectStore {}

        impl ObjectStore for ObjectStore {
            fn presign_get(
                &self,
                bucket: &str,
                key: &str,
                ttl: Duration,
            ) -> Result<String, PresignError>;
        }
    }

    impl MockObjectStore {
        pub fn should_presign(&mut self, bucket: &str, key: &str, ttl: Duration, url: &str) {
            let url = url.to_string();
            self.expect_presign_get()
                .once()
                .with(
                    predicate::eq(bucket.to_string()),
                    predicate::eq(key.to_string()),
                    predicate::eq(ttl),
                )
                .return_once(move |_, _, _| Ok(url));
        }

        pub fn should_not_presign(&mut self, err: PresignError) {
            self.expect_presign_get()
                .once()
                .return_once(move |_, _, _| Err(err));
        }
    }

    #[rstest]
    #[case("s3://my-bucket.s3.amazonaws.com/path/to/agent", "my-bucket", "path/to/agent")]
    #[case("s3://bucket.host/key", "bucket", "key")]
    #[case("https://artifacts.s3.us-west-2.amazonaws.com/nodeadm", "artifacts", "nodeadm")]
    #[case("s3://b.h//double", "b", "/double")]
    #[case("s3://b.s3.amazonaws.com/dir/my%20file", "b", "dir/my file")]
    #[case("s3://b.s3.amazonaws.com/dir/a b", "b", "dir/a b")]
    #[case("s3://b.s3.amazonaws.com/v1%2B2/node%C3%A4dm", "b", "v1+2/nodeädm")]
    fn parses_valid_locators(#[case] locator: &str, #[case] bucket: &str, #[case] key: &str) {
        let location = ObjectLocation::from_str(locator).unwrap();
        assert_eq!(location.bucket, bucket);
        assert_eq!(location.key, key);
    }

    #[rstest]
    #[case::no_dot_in_host("s3://my-bucket/path/to/agent")]
    #[case::not_an_uri("my-bucket.s3.amazonaws.com/path")]
    #[case::no_host("file:///path/to/agent")]
    #[case::empty_bucket("s3://.s3.amazonaws.com/path")]
    #[case::missing_key("s3://my-bucket.s3.amazonaws.com/")]
    #[case::empty("")]
    #[case::invalid_utf8_key("s3://my-bucket.s3.amazonaws.com/%FF")]
    fn rejects_malformed_locators(#[case] locator: &str) {
        assert_matches!(
            ObjectLocation::from_str(locator),
            Err(ArtifactError::Parse { locator: l, .. }) => assert_eq!(l, locator)
        );
    }

    #[test]
    fn presigns_parsed_location() {
        let ttl = Duration::from_secs(30 * 60);
        let mut store = MockObjectStore::new();
        store.should_presign(
            "my-bucket",
            "path/to/agent",
            ttl,
            "https://my-bucket.s3.amazonaws.com/path/to/agent?X-Amz-Expires=1800",
        );

        let url = ArtifactLocator::new(store)
            .presigned_url("s3://my-bucket.s3.amazonaws.com/path/to/agent", ttl)
            .unwrap();

        assert!(url.contains("my-bucket"));
        assert!(url.contains("path/to/agent"));
    }

    #[test]
    fn presigns_decoded_key() {
        let mut store = MockObjectStore::new();
        store.should_presign("bin", "releases/node adm", DEFAULT_URL_TTL, "https://signed");

        let url = ArtifactLocator::new(store)
            .nodeadm_url("s3://bin.s3.amazonaws.com/releases/node%20adm")
            .unwrap();
        assert_eq!(url, "https://signed");
    }

    #[test]
    fn nodeadm_url_uses_default_ttl() {
        let mut store = MockObjectStore::new();
        store.should_presign("bin", "nodeadm", DEFAULT_URL_TTL, "https://signed");

        let url = ArtifactLocator::new(store)
            .nodeadm_url("s3://bin.s3.amazonaws.com/nodeadm")
            .unwrap();
        assert_eq!(url, "https://signed");
    }

    #[test]
    fn parse_error_skips_signing() {
        let mut store = MockObjectStore::new();
        store.expect_presign_get().never();

        let result = ArtifactLocator::new(store).presigned_url("s3://nodots/key", DEFAULT_URL_TTL);
        assert_matches!(result, Err(ArtifactError::Parse { .. }));
    }

    #[test]
    fn signing_error_keeps_location() {
        let mut store = MockObjectStore::new();
        store.should_not_presign(PresignError("access denied".to_string()));

        let result = ArtifactLocator::new(store)
            .presigned_url("s3://my-bucket.s3.amazonaws.com/agent", DEFAULT_URL_TTL);

        assert_matches!(result, Err(ArtifactError::Signing { location, source }) => {
            assert_eq!(location.bucket, "my-bucket");
            assert_eq!(location.key, "agent");
            assert_eq!(source.to_string(), "access denied");
        });
    }
}
