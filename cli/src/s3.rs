//! Object store client backed by the AWS SDK.
//!
//! The engine is synchronous; each put is driven to completion on a private
//! multi-threaded tokio runtime, so transfer workers can call it in parallel.

use aws_sdk_s3::config::{BehaviorVersion, Credentials as SdkCredentials, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ChecksumAlgorithm as SdkChecksumAlgorithm;
use aws_sdk_s3::Client;
use engine::{ChecksumAlgorithm, ClientError, Credentials, ObjectClient, PutRequest};
use tokio::runtime::Runtime;

const PUT_OBJECT: &str = "PutObject";

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub region: String,
    /// Custom endpoint (e.g. MinIO or LocalStack); enables path-style addressing
    pub endpoint_url: Option<String>,
}

impl Default for S3Settings {
    fn default() -> Self {
        S3Settings {
            region: "us-east-1".to_string(),
            endpoint_url: None,
        }
    }
}

/// `ObjectClient` issuing `PutObject` calls.
///
/// The SDK client is (re)built whenever credentials are installed; puts made
/// before the first refresh fail with `NoCredentials`.
pub struct S3Client {
    runtime: Runtime,
    settings: S3Settings,
    client: Option<Client>,
}

impl S3Client {
    pub fn new(settings: S3Settings) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        Ok(S3Client {
            runtime,
            settings,
            client: None,
        })
    }

    fn build_client(&self, credentials: Credentials) -> Client {
        let sdk_credentials = SdkCredentials::new(
            credentials.access_key_id,
            credentials.secret_access_key,
            credentials.session_token,
            None,
            "forward",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.settings.region.clone()))
            .credentials_provider(sdk_credentials);
        if let Some(endpoint) = &self.settings.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Client::from_conf(builder.build())
    }
}

impl ObjectClient for S3Client {
    fn put(&self, request: PutRequest<'_>) -> Result<(), ClientError> {
        let client = self.client.as_ref().ok_or_else(|| {
            ClientError::new("NoCredentials", "credentials have not been loaded", PUT_OBJECT)
        })?;

        let mut put = client
            .put_object()
            .bucket(request.bucket)
            .key(request.key)
            .body(ByteStream::from(request.body.to_vec()));
        if let Some(content_type) = request.content_type {
            put = put.content_type(content_type);
        }
        if let Some(checksum) = request.checksum {
            put = match checksum.algorithm() {
                ChecksumAlgorithm::Sha256 => put
                    .checksum_algorithm(SdkChecksumAlgorithm::Sha256)
                    .checksum_sha256(checksum.encoded()),
                ChecksumAlgorithm::Md5 => put.content_md5(checksum.encoded()),
            };
        }

        self.runtime.block_on(put.send()).map(|_| ()).map_err(|e| {
            ClientError::new(
                e.code().unwrap_or("Unknown"),
                e.message().map(str::to_string).unwrap_or_else(|| e.to_string()),
                PUT_OBJECT,
            )
        })
    }

    fn set_credentials(&mut self, credentials: Credentials) {
        self.client = Some(self.build_client(credentials));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_without_credentials_fails_fast() {
        let client = S3Client::new(S3Settings::default()).expect("Failed to build runtime");

        let err = client
            .put(PutRequest {
                bucket: "bucket",
                key: "a.txt",
                body: b"hello",
                content_type: None,
                checksum: None,
            })
            .expect_err("no credentials installed");

        assert_eq!(err.code, "NoCredentials");
        assert_eq!(err.operation, "PutObject");
    }

    #[test]
    fn test_set_credentials_builds_client() {
        let mut client = S3Client::new(S3Settings {
            region: "eu-west-1".to_string(),
            endpoint_url: Some("http://localhost:9000".to_string()),
        })
        .expect("Failed to build runtime");

        client.set_credentials(Credentials::new("AKIAEXAMPLE", "secret"));

        assert!(client.client.is_some());
    }
}
