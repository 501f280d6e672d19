//! Repository instances and their settings.

use super::{endpoint::Endpoint, storage_class::StorageClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::HashMap, fmt};
use uuid::Uuid;

/// Names of the per-instance settings, in form order.
pub const OPTION_NAMES: [&str; 6] = [
    "access_key",
    "secret_key",
    "endpoint",
    "bucket_name",
    "base_path",
    "storage_class",
];

/// A configured repository as recorded by the host.
///
/// Settings live in a separate key-value table, see [`InstanceConfig`].
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct RepositoryInstance {
    pub id: Uuid,

    /// Display name, unique across instances.
    pub name: String,

    pub created_at: DateTime<Utc>,
}

/// Validated settings for one repository instance.
///
/// Immutable once built; a changed setting means a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub bucket_name: String,
    pub endpoint: Endpoint,
    /// `None` defers to the ambient AWS credential chain.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Either empty or `some/prefix/`: no leading slash, one trailing slash.
    pub base_path: String,
    pub storage_class: StorageClass,
}

impl InstanceConfig {
    pub fn new(bucket_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            endpoint: Endpoint::default(),
            access_key: None,
            secret_key: None,
            base_path: String::new(),
            storage_class: StorageClass::default(),
        }
    }

    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = normalize_base_path(base_path);
        self
    }

    pub fn with_storage_class(mut self, storage_class: StorageClass) -> Self {
        self.storage_class = storage_class;
        self
    }

    /// Full bucket key for a key relative to the base path.
    pub fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.base_path, key.trim_start_matches('/'))
    }

    /// Flatten into `(option name, value)` rows. Unset credentials are omitted.
    pub fn to_settings(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            ("endpoint", self.endpoint.host().to_string()),
            ("bucket_name", self.bucket_name.clone()),
            ("base_path", self.base_path.clone()),
            ("storage_class", self.storage_class.as_str().to_string()),
        ];
        if let Some(access_key) = &self.access_key {
            rows.push(("access_key", access_key.clone()));
        }
        if let Some(secret_key) = &self.secret_key {
            rows.push(("secret_key", secret_key.clone()));
        }
        rows
    }

    /// Rebuild from stored rows. Missing optional rows take their defaults.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self, String> {
        let bucket_name = settings
            .get("bucket_name")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| "bucket_name is not set".to_string())?;

        let endpoint = match settings.get("endpoint").filter(|v| !v.is_empty()) {
            Some(host) => {
                Endpoint::parse(host).ok_or_else(|| format!("unknown endpoint `{}`", host))?
            }
            None => Endpoint::default(),
        };

        let storage_class = match settings.get("storage_class").filter(|v| !v.is_empty()) {
            Some(raw) => raw.parse()?,
            None => StorageClass::default(),
        };

        let non_empty = |name: &str| settings.get(name).filter(|v| !v.is_empty()).cloned();

        Ok(Self {
            bucket_name: bucket_name.clone(),
            endpoint,
            access_key: non_empty("access_key"),
            secret_key: non_empty("secret_key"),
            base_path: normalize_base_path(
                settings.get("base_path").map(String::as_str).unwrap_or(""),
            ),
            storage_class,
        })
    }
}

impl fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("bucket_name", &self.bucket_name)
            .field("endpoint", &self.endpoint.host())
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("base_path", &self.base_path)
            .field("storage_class", &self.storage_class)
            .finish()
    }
}

/// Strip surrounding slashes and whitespace, then add one trailing slash.
pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Raw instance settings as submitted by the configuration form.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct InstanceForm {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub endpoint: Option<String>,
    pub bucket_name: Option<String>,
    pub base_path: Option<String>,
    pub storage_class: Option<String>,
    /// Files to upload into the bucket while the form is validated.
    pub attachments: Vec<Attachment>,
}

/// A file supplied with the configuration form.
#[derive(Deserialize, Clone, Debug)]
pub struct Attachment {
    /// Path relative to the instance base path.
    pub path: String,
    /// Base64 encoded body.
    pub content: String,
}

/// A validation message, tied to a form field or to the form as a whole.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}
