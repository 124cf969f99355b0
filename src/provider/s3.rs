//! S3 adapter (feature `s3`)
//!
//! Wraps the async aws-sdk-s3 client behind the blocking provider traits.
//! Worker threads call into a shared multi-threaded tokio runtime with
//! `block_on`, so the engine itself stays thread-based.
//!
//! Part transfers run under `tokio::time::timeout` bounded by the part
//! deadline; every other call is bounded by the client's operation timeout.

use super::{time_left, CompletedPart, MultipartDestination, RangeSource};
use crate::error::{Result, TransferError};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

/// Client settings for S3-compatible stores
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    /// AWS region (falls back to the environment)
    pub region: Option<String>,
    /// Custom endpoint URL (MinIO, localstack, ...)
    pub endpoint: Option<String>,
    /// Path-style addressing, required by some S3-compatible services
    pub force_path_style: bool,
    /// Upper bound on a single request attempt
    pub operation_timeout: Option<Duration>,
}

/// Client plus the runtime that drives it
#[derive(Clone)]
pub struct S3Context {
    client: Client,
    runtime: Arc<Runtime>,
}

impl S3Context {
    /// Build a client from the environment's credential chain
    pub fn connect(options: &S3Options) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("partcopy-s3")
            .build()?;

        let client = runtime.block_on(async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = &options.region {
                loader = loader.region(Region::new(region.clone()));
            }
            let shared = loader.load().await;

            let mut builder = aws_sdk_s3::config::Builder::from(&shared);
            if let Some(endpoint) = &options.endpoint {
                builder = builder.endpoint_url(endpoint);
            }
            if options.force_path_style {
                builder = builder.force_path_style(true);
            }
            if let Some(timeout) = options.operation_timeout {
                builder = builder.timeout_config(
                    TimeoutConfig::builder()
                        .operation_attempt_timeout(timeout)
                        .build(),
                );
            }
            Client::from_conf(builder.build())
        });

        Ok(Self {
            client,
            runtime: Arc::new(runtime),
        })
    }
}

/// Classify an SDK failure: throttling, 5xx and transport errors are
/// transient, everything else is a provider rejection
fn classify<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> TransferError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            status >= 500 || status == 429
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        _ => false,
    };

    let message = DisplayErrorContext(&err).to_string();
    if transient {
        TransferError::transient(operation, message)
    } else {
        TransferError::provider(operation, message)
    }
}

/// Drive `call` to completion or fail once `deadline` passes
fn block_on_until<T>(
    runtime: &Runtime,
    deadline: Instant,
    context: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    let budget = time_left(deadline, context)?;
    runtime.block_on(async {
        match tokio::time::timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::transient(
                context,
                format!("no completion within {:?}", budget),
            )),
        }
    })
}

fn size_from(operation: &'static str, length: Option<i64>) -> Result<u64> {
    length
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| TransferError::provider(operation, "missing or invalid Content-Length"))
}

async fn head_size(client: &Client, bucket: &str, key: &str) -> Result<u64> {
    let head = client
        .head_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| classify("head_object", e))?;
    size_from("head_object", head.content_length())
}

/// Ranged `GetObject` source
#[derive(Clone)]
pub struct S3Source {
    context: S3Context,
    bucket: String,
}

impl S3Source {
    pub fn new(context: S3Context, bucket: impl Into<String>) -> Self {
        Self {
            context,
            bucket: bucket.into(),
        }
    }
}

impl RangeSource for S3Source {
    fn object_size(&self, key: &str) -> Result<u64> {
        let S3Context { client, runtime } = &self.context;
        runtime.block_on(head_size(client, &self.bucket, key))
    }

    fn object_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let S3Context { client, runtime } = &self.context;
        let head = runtime
            .block_on(client.head_object().bucket(&self.bucket).key(key).send())
            .map_err(|e| classify("head_object", e))?;
        Ok(head
            .last_modified()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())))
    }

    fn read_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
        deadline: Instant,
        sink: &mut dyn Write,
    ) -> Result<u64> {
        if length == 0 {
            return Ok(0);
        }
        let S3Context { client, runtime } = &self.context;
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let context = format!("get_object {} {}", key, range);

        block_on_until(runtime, deadline, &context, async {
            let response = client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .range(range)
                .send()
                .await
                .map_err(|e| classify("get_object", e))?;

            let mut body = response.body;
            let mut copied = 0u64;
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| TransferError::transient("get_object body", e))?;
                sink.write_all(&chunk)
                    .map_err(|e| TransferError::transient(format!("spool {}", key), e))?;
                copied += chunk.len() as u64;
            }

            if copied != length {
                return Err(TransferError::transient(
                    "get_object",
                    format!("short read: {} of {} bytes", copied, length),
                ));
            }
            Ok(copied)
        })
    }
}

/// Multipart upload destination
#[derive(Clone)]
pub struct S3Destination {
    context: S3Context,
    bucket: String,
}

impl S3Destination {
    pub fn new(context: S3Context, bucket: impl Into<String>) -> Self {
        Self {
            context,
            bucket: bucket.into(),
        }
    }
}

fn part_number_i32(part_number: u32) -> Result<i32> {
    i32::try_from(part_number)
        .map_err(|_| TransferError::Validation(format!("part number {} out of range", part_number)))
}

impl MultipartDestination for S3Destination {
    fn open_multipart(&self, key: &str) -> Result<String> {
        let S3Context { client, runtime } = &self.context;
        runtime.block_on(async {
            let created = client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify("create_multipart_upload", e))?;
            created.upload_id().map(str::to_string).ok_or_else(|| {
                TransferError::provider("create_multipart_upload", "response has no upload id")
            })
        })
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: &[u8],
        deadline: Instant,
    ) -> Result<String> {
        let S3Context { client, runtime } = &self.context;
        let context = format!("upload part {}", part_number);
        let part_number = part_number_i32(part_number)?;
        block_on_until(runtime, deadline, &context, async {
            let uploaded = client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data.to_vec()))
                .send()
                .await
                .map_err(|e| classify("upload_part", e))?;
            uploaded
                .e_tag()
                .map(str::to_string)
                .ok_or_else(|| TransferError::provider("upload_part", "response has no ETag"))
        })
    }

    fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<u64> {
        let S3Context { client, runtime } = &self.context;
        let completed = parts
            .iter()
            .map(|part| {
                Ok(S3CompletedPart::builder()
                    .part_number(part_number_i32(part.part_number)?)
                    .e_tag(&part.etag)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        runtime.block_on(async {
            client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(completed))
                        .build(),
                )
                .send()
                .await
                .map_err(|e| classify("complete_multipart_upload", e))?;

            head_size(client, &self.bucket, key).await
        })
    }

    fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        let S3Context { client, runtime } = &self.context;
        runtime.block_on(async {
            client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
                .map_err(|e| classify("abort_multipart_upload", e))?;
            Ok(())
        })
    }
}
