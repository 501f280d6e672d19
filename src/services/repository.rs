//! src/services/repository.rs
//!
//! S3Repository: presents one bucket (optionally scoped to a base path) as a
//! browsable folder tree. Listing walks every page of a delimited prefix
//! listing and reshapes it into folders, files and a breadcrumb trail.
//! Fetching streams an object to local disk or signs a short-lived URL.

use crate::models::{
    instance::{Attachment, FieldError, InstanceConfig, OPTION_NAMES},
    listing::{Breadcrumb, Listing, ListingNode, ObjectEntry, PrefixEntry},
};
use crate::services::object_store::{ListRequest, ObjectStoreClient, StoreError};
use async_trait::async_trait;
use futures::StreamExt;
use std::{
    collections::HashSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const DELIMITER: &str = "/";
const MAX_PATH_LEN: usize = 1024;
/// Longest expiry S3 accepts for a SigV4 presigned URL.
pub const MAX_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("error while communicating with {repository}: {detail}")]
    Communication { repository: String, detail: String },
    #[error("invalid path `{0}`")]
    InvalidPath(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Host-wide switches applied to every repository instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepositoryPolicy {
    /// Allow instances without an access key to use ambient AWS credentials.
    pub allow_default_credentials: bool,
    /// Presigned URLs carry an `attachment` Content-Disposition.
    pub force_download: bool,
}

/// What a host file picker can ask of a repository.
#[async_trait]
pub trait FileRepository: Send + Sync {
    fn option_names(&self) -> &'static [&'static str];

    /// Direct children of `path` plus the trail leading to it.
    async fn list(&self, path: &str) -> RepositoryResult<Listing>;

    /// Download `key` to `dest`, returning the number of bytes written.
    async fn fetch(&self, key: &str, dest: &Path) -> RepositoryResult<u64>;

    async fn presign(&self, key: &str, ttl: Duration) -> RepositoryResult<String>;

    /// Check the bucket and upload form attachments, collecting failures.
    async fn validate_config(&self, attachments: &[Attachment]) -> Vec<FieldError>;
}

pub struct S3Repository<C> {
    name: String,
    config: InstanceConfig,
    client: C,
    policy: RepositoryPolicy,
}

impl<C: ObjectStoreClient> S3Repository<C> {
    pub fn new(
        name: impl Into<String>,
        config: InstanceConfig,
        client: C,
        policy: RepositoryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            client,
            policy,
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    /// Fail before any network call when the instance cannot authenticate.
    pub(crate) fn ensure_configured(&self) -> RepositoryResult<()> {
        if self.config.bucket_name.trim().is_empty() {
            return Err(RepositoryError::MissingCredential("bucket name is required"));
        }
        let has_key = self
            .config
            .access_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if !has_key && !self.policy.allow_default_credentials {
            return Err(RepositoryError::MissingCredential("access key is required"));
        }
        Ok(())
    }

    /// Collapse any store failure into the single communication error.
    pub(crate) fn communication(&self, err: impl Into<StoreError>) -> RepositoryError {
        let err = err.into();
        warn!("repository {} store call failed: {}", self.name, err);
        RepositoryError::Communication {
            repository: self.name.clone(),
            detail: err.to_string(),
        }
    }

    /// Human-readable origin of a file, e.g. `s3://bucket/base/docs/a.txt`.
    pub fn source_info(&self, key: &str) -> String {
        format!(
            "s3://{}/{}",
            self.config.bucket_name,
            self.config.object_key(key)
        )
    }

    /// List the direct children of `requested_path`.
    ///
    /// Every page is consumed before returning. Folders come first, then
    /// files, each group in store order.
    pub async fn list_path(&self, requested_path: &str) -> RepositoryResult<Listing> {
        ensure_path_safe(requested_path)?;
        self.ensure_configured()?;

        let listing_path = normalize_request_path(requested_path);
        let effective_prefix = format!("{}{}", self.config.base_path, listing_path);
        debug!(
            "listing {} in bucket {} (prefix {:?})",
            self.name, self.config.bucket_name, effective_prefix
        );

        let mut prefixes = Vec::new();
        let mut objects = Vec::new();
        let mut continuation_token = None;
        loop {
            let page = self
                .client
                .list_objects(ListRequest {
                    bucket: self.config.bucket_name.clone(),
                    prefix: effective_prefix.clone(),
                    delimiter: DELIMITER.to_string(),
                    continuation_token: continuation_token.take(),
                })
                .await
                .map_err(|e| self.communication(e))?;

            prefixes.extend(page.prefixes);
            objects.extend(page.objects);

            match page.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        let nodes = translate(&listing_path, &effective_prefix, &prefixes, &objects);
        debug!(
            "listed {} entries ({} store objects, {} prefixes)",
            nodes.len(),
            objects.len(),
            prefixes.len()
        );

        Ok(Listing {
            nodes,
            breadcrumbs: breadcrumbs(&listing_path),
        })
    }

    /// Stream `key` into `dest`, replacing any existing file.
    ///
    /// The body is written to a temporary sibling and renamed into place, so a
    /// failed download never leaves a partial file at `dest`.
    pub async fn fetch_to_local(&self, key: &str, dest: &Path) -> RepositoryResult<u64> {
        ensure_path_safe(key)?;
        self.ensure_configured()?;

        let object_key = self.config.object_key(key);
        debug!("fetching {} to {}", object_key, dest.display());
        let mut body = self
            .client
            .get_object(&self.config.bucket_name, &object_key)
            .await
            .map_err(|e| self.communication(e))?;

        let parent = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(self.communication(StoreError::new(err.to_string())));
                }
            };
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(RepositoryError::Io(err));
            }
            written += chunk.len() as u64;
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(RepositoryError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, dest).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(dest).await?;
                fs::rename(&tmp_path, dest).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(RepositoryError::Io(err));
            }
        }

        debug!("fetched {} bytes into {}", written, dest.display());
        Ok(written)
    }

    /// Sign a GET URL for `key` valid for `ttl`.
    pub async fn presigned_redirect(&self, key: &str, ttl: Duration) -> RepositoryResult<String> {
        ensure_path_safe(key)?;
        if ttl.is_zero() || ttl > MAX_PRESIGN_TTL {
            return Err(RepositoryError::Configuration(format!(
                "presigned URL lifetime must be between 1 second and {} seconds, got {}",
                MAX_PRESIGN_TTL.as_secs(),
                ttl.as_secs()
            )));
        }
        self.ensure_configured()?;

        let object_key = self.config.object_key(key);
        let disposition = self
            .policy
            .force_download
            .then(|| attachment_disposition(&object_key));
        debug!("presigning {} for {}s", object_key, ttl.as_secs());

        self.client
            .presign_get(&self.config.bucket_name, &object_key, ttl, disposition)
            .await
            .map_err(|e| self.communication(e))
    }
}

#[async_trait]
impl<C: ObjectStoreClient> FileRepository for S3Repository<C> {
    fn option_names(&self) -> &'static [&'static str] {
        &OPTION_NAMES
    }

    async fn list(&self, path: &str) -> RepositoryResult<Listing> {
        self.list_path(path).await
    }

    async fn fetch(&self, key: &str, dest: &Path) -> RepositoryResult<u64> {
        self.fetch_to_local(key, dest).await
    }

    async fn presign(&self, key: &str, ttl: Duration) -> RepositoryResult<String> {
        self.presigned_redirect(key, ttl).await
    }

    async fn validate_config(&self, attachments: &[Attachment]) -> Vec<FieldError> {
        self.verify_and_upload(attachments).await
    }
}

/// Reject paths and keys that could climb out of the base path.
///
/// Refuses `..` segments, backslashes, control characters and over-long
/// input. Leading slashes are tolerated and stripped elsewhere.
pub fn ensure_path_safe(path: &str) -> RepositoryResult<()> {
    if path.len() > MAX_PATH_LEN {
        return Err(RepositoryError::InvalidPath(path.to_string()));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(RepositoryError::InvalidPath(path.to_string()));
    }
    if path.chars().any(|c| c.is_control() || c == '\\') {
        return Err(RepositoryError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Drop empty and `.` segments and end with one slash; the root is `""`.
///
/// `""`, `"/"`, `"."` and `"./"` all name the root.
pub fn normalize_request_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .fold(String::new(), |mut joined, segment| {
            joined.push_str(segment);
            joined.push('/');
            joined
        })
}

/// Trail for a listing path: `"a/b/"` gives `a -> a/` then `b -> a/b/`.
pub fn breadcrumbs(path: &str) -> Vec<Breadcrumb> {
    let mut crumbs = Vec::new();
    let mut joined = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        joined.push_str(segment);
        joined.push('/');
        crumbs.push(Breadcrumb::new(segment, joined.clone()));
    }
    crumbs
}

/// Name of `full` relative to `prefix` when it is a direct child.
fn child_name<'a>(full: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = full.strip_prefix(prefix)?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

fn translate(
    listing_path: &str,
    effective_prefix: &str,
    prefixes: &[PrefixEntry],
    objects: &[ObjectEntry],
) -> Vec<ListingNode> {
    let mut seen = HashSet::new();
    let mut nodes = Vec::with_capacity(prefixes.len() + objects.len());

    for entry in prefixes {
        let Some(title) = child_name(&entry.prefix, effective_prefix) else {
            continue;
        };
        if seen.insert(title) {
            nodes.push(ListingNode::directory(
                title,
                format!("{}{}/", listing_path, title),
            ));
        }
    }

    // Zero-size objects are folder placeholders.
    let files = objects
        .iter()
        .filter(|obj| obj.size > 0 && !obj.key.ends_with('/'))
        .filter_map(|obj| {
            let title = child_name(&obj.key, effective_prefix)?;
            let path = format!("{}{}", listing_path, title);
            Some(ListingNode::File {
                title: title.to_string(),
                size: obj.size,
                modified_at: obj.last_modified,
                source_key: path.clone(),
                path,
            })
        });
    nodes.extend(files);
    nodes
}

fn attachment_disposition(object_key: &str) -> String {
    let filename: String = object_key
        .rsplit('/')
        .next()
        .unwrap_or(object_key)
        .chars()
        .filter(|c| *c != '"' && !c.is_control())
        .collect();
    format!("attachment; filename=\"{}\"", filename)
}
