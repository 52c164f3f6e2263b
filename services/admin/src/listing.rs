use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client as S3Client;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// File extensions recognized as media, compared case-insensitively
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "tiff", "tif", "heic", "heif", "avif",
    "ico", "jxl", "raw",
];

/// Errors raised while enumerating objects
#[derive(Error, Debug)]
pub enum ListingError {
    #[error("Bucket must not be empty")]
    EmptyBucket,

    #[error("Prefix must not be empty")]
    EmptyPrefix,

    #[error("Failed to list {bucket}/{prefix}: {message}")]
    Page {
        bucket: String,
        prefix: String,
        message: String,
    },

    #[error("Listing of {bucket}/{prefix} is truncated but has no continuation token")]
    MissingContinuation { bucket: String, prefix: String },

    #[error("Listing cancelled after {pages} pages")]
    Cancelled { pages: u32 },
}

/// One page of a prefix listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    pub next_continuation_token: Option<String>,
    pub is_truncated: bool,
}

/// Source of listing pages; each call is one request to the object store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectPageSource: Send + Sync {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage, ListingError>;
}

/// Whether a key ends in a recognized media extension
pub fn is_media_key(key: &str) -> bool {
    Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.iter().any(|m| m.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// S3 `ListObjectsV2` page source
pub struct S3PageSource {
    client: S3Client,
    max_keys: i32,
}

impl S3PageSource {
    /// Create a new S3 page source
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            region = %config.region,
            max_keys = config.max_keys,
            "S3 page source initialized"
        );

        Self {
            client,
            max_keys: config.max_keys,
        }
    }
}

#[async_trait]
impl ObjectPageSource for S3PageSource {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage, ListingError> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(self.max_keys)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| ListingError::Page {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(String::from))
            .collect();

        Ok(ObjectPage {
            keys,
            next_continuation_token: response.next_continuation_token().map(String::from),
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }
}

/// Enumerates media keys under a prefix, hiding pagination from callers
pub struct MediaLister<P> {
    source: P,
}

impl<P: ObjectPageSource> MediaLister<P> {
    pub fn new(source: P) -> Self {
        Self { source }
    }

    /// List every media key under `prefix`.
    ///
    /// Pages are requested one after another since each continuation token
    /// comes from the previous page. Keys are returned once each, in the
    /// order the store first listed them. Any failed page or a cancelled
    /// token fails the whole listing.
    #[instrument(skip(self, cancel))]
    pub async fn list_media_keys(
        &self,
        bucket: &str,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ListingError> {
        if bucket.trim().is_empty() {
            return Err(ListingError::EmptyBucket);
        }
        if prefix.trim().is_empty() {
            return Err(ListingError::EmptyPrefix);
        }

        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        let mut continuation_token = None;
        let mut pages = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(ListingError::Cancelled { pages });
            }
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ListingError::Cancelled { pages }),
                page = self.source.list_page(bucket, prefix, continuation_token.take()) => page?,
            };
            pages += 1;
            metrics::counter!("admin.listing.pages").increment(1);

            for key in page.keys {
                if is_media_key(&key) && seen.insert(key.clone()) {
                    keys.push(key);
                }
            }

            match page.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None if page.is_truncated => {
                    return Err(ListingError::MissingContinuation {
                        bucket: bucket.to_string(),
                        prefix: prefix.to_string(),
                    })
                }
                None => break,
            }
        }

        metrics::counter!("admin.listing.keys").increment(keys.len() as u64);
        debug!(pages = pages, keys = keys.len(), "Listing completed");

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn page(keys: &[&str], next: Option<&str>) -> ObjectPage {
        ObjectPage {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            next_continuation_token: next.map(String::from),
            is_truncated: next.is_some(),
        }
    }

    /// Mock serving `pages` in order, chained by tokens "t1", "t2", ...
    fn paged_source(pages: Vec<ObjectPage>) -> MockObjectPageSource {
        let mut source = MockObjectPageSource::new();
        let mut seq = Sequence::new();
        for (i, page) in pages.into_iter().enumerate() {
            let expected = if i == 0 { None } else { Some(format!("t{i}")) };
            source
                .expect_list_page()
                .withf(move |bucket, prefix, token| {
                    bucket == "media" && prefix == "aircraft/" && *token == expected
                })
                .times(1)
                .in_sequence(&mut seq)
                .return_once(move |_, _, _| Ok(page));
        }
        source
    }

    #[test]
    fn test_is_media_key() {
        assert!(is_media_key("aircraft/a320.jpg"));
        assert!(is_media_key("aircraft/A320.JPEG"));
        assert!(is_media_key("x/y.HeIc"));
        assert!(is_media_key("x/y.jxl"));
        assert!(!is_media_key("aircraft/notes.txt"));
        assert!(!is_media_key("aircraft/"));
        assert!(!is_media_key("aircraft/jpg"));
    }

    #[tokio::test]
    async fn test_single_page_filters_non_media() {
        let source = paged_source(vec![page(&["aircraft/a.jpg", "aircraft/readme.md"], None)]);
        let lister = MediaLister::new(source);

        let keys = lister
            .list_media_keys("media", "aircraft/", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(keys, vec!["aircraft/a.jpg"]);
    }

    #[tokio::test]
    async fn test_follows_continuation_tokens() {
        let source = paged_source(vec![
            page(&["aircraft/a.jpg", "aircraft/b.png"], Some("t1")),
            page(&["aircraft/c.txt"], Some("t2")),
            page(&["aircraft/d.webp", "aircraft/b.png"], None),
        ]);
        let lister = MediaLister::new(source);

        let keys = lister
            .list_media_keys("media", "aircraft/", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            keys,
            vec!["aircraft/a.jpg", "aircraft/b.png", "aircraft/d.webp"]
        );
    }

    #[tokio::test]
    async fn test_union_of_pages_regardless_of_boundaries() {
        let all: Vec<String> = (0..10).map(|i| format!("aircraft/{i}.jpg")).collect();

        for page_size in 1..=4 {
            let chunks: Vec<&[String]> = all.chunks(page_size).collect();
            let count = chunks.len();
            let pages = chunks
                .into_iter()
                .enumerate()
                .map(|(i, chunk)| ObjectPage {
                    keys: chunk.to_vec(),
                    next_continuation_token: (i + 1 < count).then(|| format!("t{}", i + 1)),
                    is_truncated: i + 1 < count,
                })
                .collect();
            let lister = MediaLister::new(paged_source(pages));

            let keys = lister
                .list_media_keys("media", "aircraft/", &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(keys, all, "page size {page_size}");
        }
    }

    #[tokio::test]
    async fn test_failed_page_returns_no_partial_result() {
        let mut source = MockObjectPageSource::new();
        source
            .expect_list_page()
            .with(eq("media"), eq("aircraft/"), eq(None::<String>))
            .times(1)
            .return_once(|_, _, _| Ok(page(&["aircraft/a.jpg"], Some("t1"))));
        source
            .expect_list_page()
            .with(eq("media"), eq("aircraft/"), eq(Some("t1".to_string())))
            .times(1)
            .return_once(|bucket, prefix, _| {
                Err(ListingError::Page {
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                    message: "access denied".to_string(),
                })
            });
        let lister = MediaLister::new(source);

        let result = lister
            .list_media_keys("media", "aircraft/", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ListingError::Page { .. })));
    }

    #[tokio::test]
    async fn test_truncated_page_without_token_fails() {
        let mut source = MockObjectPageSource::new();
        source.expect_list_page().times(1).return_once(|_, _, _| {
            Ok(ObjectPage {
                keys: vec!["aircraft/a.jpg".to_string()],
                next_continuation_token: None,
                is_truncated: true,
            })
        });
        let lister = MediaLister::new(source);

        let result = lister
            .list_media_keys("media", "aircraft/", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ListingError::MissingContinuation { .. })));
    }

    #[tokio::test]
    async fn test_empty_parameters_fail_fast() {
        let mut source = MockObjectPageSource::new();
        source.expect_list_page().never();
        let lister = MediaLister::new(source);
        let cancel = CancellationToken::new();

        assert!(matches!(
            lister.list_media_keys("", "aircraft/", &cancel).await,
            Err(ListingError::EmptyBucket)
        ));
        assert!(matches!(
            lister.list_media_keys("media", "", &cancel).await,
            Err(ListingError::EmptyPrefix)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_listing_stops() {
        let mut source = MockObjectPageSource::new();
        source.expect_list_page().never();
        let lister = MediaLister::new(source);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = lister.list_media_keys("media", "aircraft/", &cancel).await;

        assert!(matches!(result, Err(ListingError::Cancelled { pages: 0 })));
    }

    /// Serves one page, then cancels `cancel` and never answers
    struct StallingSource {
        calls: AtomicU32,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl ObjectPageSource for StallingSource {
        async fn list_page(
            &self,
            _bucket: &str,
            _prefix: &str,
            _continuation_token: Option<String>,
        ) -> Result<ObjectPage, ListingError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(page(&["aircraft/a.jpg"], Some("t1")));
            }
            self.cancel.cancel();
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_during_pending_page_stops_listing() {
        let cancel = CancellationToken::new();
        let lister = MediaLister::new(StallingSource {
            calls: AtomicU32::new(0),
            cancel: cancel.clone(),
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            lister.list_media_keys("media", "aircraft/", &cancel),
        )
        .await
        .expect("listing did not stop after cancellation");

        assert!(matches!(result, Err(ListingError::Cancelled { pages: 1 })));
        assert_eq!(lister.source.calls.load(Ordering::SeqCst), 2);
    }
}
