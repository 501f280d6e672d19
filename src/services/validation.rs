//! Validation of submitted instance settings.
//!
//! Validation never fails outright: every problem becomes a [`FieldError`]
//! and the caller decides what to do with the list. Field checks run first;
//! the bucket check and attachment uploads only run on a clean form.

use crate::models::{
    endpoint::Endpoint,
    instance::{Attachment, FieldError, InstanceConfig, InstanceForm},
    storage_class::StorageClass,
};
use crate::services::{
    object_store::{ObjectStoreClient, PutRequest},
    repository::{S3Repository, ensure_path_safe},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use tracing::debug;

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const REQUIRED: &str = "Required";

/// Check every form field and build the config when all of them pass.
pub fn check_form(
    form: &InstanceForm,
    allow_default_credentials: bool,
) -> Result<InstanceConfig, Vec<FieldError>> {
    let mut errors = Vec::new();
    let trimmed = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let bucket_name = trimmed(&form.bucket_name);
    match &bucket_name {
        None => errors.push(FieldError::field("bucket_name", REQUIRED)),
        Some(name) => {
            if let Err(reason) = ensure_bucket_name_valid(name) {
                errors.push(FieldError::field("bucket_name", reason));
            }
        }
    }

    let access_key = trimmed(&form.access_key);
    let secret_key = trimmed(&form.secret_key);
    if access_key.is_none() && !allow_default_credentials {
        errors.push(FieldError::field("access_key", REQUIRED));
    }
    if access_key.is_some() && secret_key.is_none() {
        errors.push(FieldError::field("secret_key", REQUIRED));
    }

    let endpoint = match trimmed(&form.endpoint) {
        None => Endpoint::default(),
        Some(host) => Endpoint::parse(&host).unwrap_or_else(|| {
            errors.push(FieldError::field(
                "endpoint",
                format!("unsupported endpoint `{}`", host),
            ));
            Endpoint::default()
        }),
    };

    let storage_class = match trimmed(&form.storage_class) {
        None => StorageClass::default(),
        Some(raw) => raw.parse::<StorageClass>().unwrap_or_else(|reason: String| {
            errors.push(FieldError::field("storage_class", reason));
            StorageClass::default()
        }),
    };

    let raw_base_path = form.base_path.as_deref().unwrap_or("");
    if ensure_path_safe(raw_base_path).is_err() {
        errors.push(FieldError::field(
            "base_path",
            "must not contain `..` segments, backslashes or control characters",
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let mut config = InstanceConfig::new(bucket_name.unwrap_or_default())
        .with_endpoint(endpoint)
        .with_base_path(raw_base_path)
        .with_storage_class(storage_class);
    // A lone secret means nothing to the ambient credential chain.
    if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
        config = config.with_credentials(access_key, secret_key);
    }
    Ok(config)
}

impl<C: ObjectStoreClient> S3Repository<C> {
    /// Check the bucket, then upload each non-empty attachment.
    ///
    /// A failed bucket check yields one generic error and skips the uploads. Each
    /// failed upload yields its own generic error; the rest still run.
    pub async fn verify_and_upload(&self, attachments: &[Attachment]) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if let Err(err) = self.ensure_configured() {
            errors.push(FieldError::generic(err.to_string()));
            return errors;
        }

        let bucket = &self.config().bucket_name;
        debug!("checking bucket {}", bucket);
        if let Err(err) = self.client().head_bucket(bucket).await {
            errors.push(FieldError::generic(self.communication(err).to_string()));
            return errors;
        }

        for attachment in attachments {
            let relative = attachment.path.trim_start_matches('/');
            if relative.is_empty() || ensure_path_safe(relative).is_err() {
                errors.push(FieldError::field(
                    "attachments",
                    format!("invalid attachment path `{}`", attachment.path),
                ));
                continue;
            }

            let body = match general_purpose::STANDARD.decode(attachment.content.trim()) {
                Ok(body) => body,
                Err(err) => {
                    errors.push(FieldError::generic(format!(
                        "attachment `{}` is not valid base64: {}",
                        relative, err
                    )));
                    continue;
                }
            };
            if body.is_empty() {
                continue;
            }

            let key = self.config().object_key(relative);
            debug!(
                "uploading {} ({} bytes, {})",
                key,
                body.len(),
                self.config().storage_class
            );
            let request = PutRequest {
                bucket: bucket.clone(),
                key,
                body: Bytes::from(body),
                storage_class: self.config().storage_class,
            };
            if let Err(err) = self.client().put_object(request).await {
                errors.push(FieldError::generic(self.communication(err).to_string()));
            }
        }

        errors
    }
}

/// S3 bucket naming rules.
///
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - starts and ends with a letter or digit
/// - no consecutive dots or dot-hyphen pairs
/// - not shaped like an IPv4 address
pub fn ensure_bucket_name_valid(name: &str) -> Result<(), String> {
    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err("must be between 3 and 63 characters".into());
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err("allowed characters are lowercase letters, digits, dots, and hyphens".into());
    }

    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err("must start and end with a lowercase letter or digit".into());
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err("cannot contain consecutive dots or dot-hyphen combinations".into());
    }

    if is_ipv4_like(name) {
        return Err("must not be formatted like an IP address".into());
    }

    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
