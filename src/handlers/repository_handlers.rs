//! HTTP handlers for the host-facing repository operations.
//!
//! Each request opens the instance's repository, runs one operation against
//! the bucket and renders the result in the shape the file picker expects.

use crate::{
    errors::{AppError, ValidationFailed},
    models::{
        endpoint::{DEFAULT_ENDPOINT, Endpoint},
        instance::{InstanceConfig, InstanceForm, OPTION_NAMES, RepositoryInstance},
        listing::ListingResponse,
        storage_class::StorageClass,
    },
    services::{
        instance_service::{InstanceService, Registration},
        repository::FileRepository,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Bytes escaped in one key segment of a file URL: everything outside the
/// RFC 3986 unreserved set.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Query params accepted by the listing endpoint.
#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    #[serde(default)]
    pub path: String,
    /// Accepted for host compatibility; listings are never paged.
    pub page: Option<String>,
}

/// Body for validating or creating an instance.
#[derive(Debug, Deserialize)]
pub struct InstanceReq {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub form: InstanceForm,
}

#[derive(Debug, Deserialize)]
pub struct FetchReq {
    pub key: String,
    #[serde(default)]
    pub local_name: String,
}

#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub path: String,
    pub url: String,
    pub source: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct OptionsResponse {
    pub options: &'static [&'static str],
    pub endpoints: Vec<&'static str>,
    pub default_endpoint: &'static str,
    pub storage_classes: Vec<&'static str>,
    pub default_storage_class: StorageClass,
}

/// What the file picker may do with this repository type.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub check_login: bool,
    pub global_search: bool,
    pub contains_private_data: bool,
    pub return_types: &'static [&'static str],
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            check_login: true,
            global_search: false,
            contains_private_data: true,
            return_types: &["internal"],
        }
    }
}

/// Instance record plus its non-secret settings.
#[derive(Debug, Serialize)]
pub struct InstanceResponse {
    #[serde(flatten)]
    pub instance: RepositoryInstance,
    pub bucket_name: String,
    pub endpoint: Endpoint,
    pub region: &'static str,
    pub base_path: String,
    pub storage_class: StorageClass,
    pub has_access_key: bool,
    pub capabilities: Capabilities,
}

impl InstanceResponse {
    fn new(instance: RepositoryInstance, config: &InstanceConfig) -> Self {
        Self {
            instance,
            bucket_name: config.bucket_name.clone(),
            endpoint: config.endpoint,
            region: config.endpoint.region(),
            base_path: config.base_path.clone(),
            storage_class: config.storage_class,
            has_access_key: config.access_key.is_some(),
            capabilities: Capabilities::default(),
        }
    }
}

/// `GET /repositories/options`: names of the per-instance settings.
pub async fn option_names() -> Json<OptionsResponse> {
    Json(OptionsResponse {
        options: &OPTION_NAMES,
        endpoints: Endpoint::all().iter().map(Endpoint::host).collect(),
        default_endpoint: DEFAULT_ENDPOINT,
        storage_classes: StorageClass::ALL.iter().map(StorageClass::as_str).collect(),
        default_storage_class: StorageClass::default(),
    })
}

/// `POST /repositories/validate`: validate settings without saving them.
///
/// Always 200; problems are listed in `errors`.
pub async fn validate_instance(
    State(service): State<InstanceService>,
    Json(req): Json<InstanceReq>,
) -> impl IntoResponse {
    let errors = service.validate_form(&req.name, &req.form).await;
    Json(serde_json::json!({ "errors": errors }))
}

/// `GET /repositories`
pub async fn list_instances(
    State(service): State<InstanceService>,
) -> Result<Json<Vec<RepositoryInstance>>, AppError> {
    Ok(Json(service.list_instances().await?))
}

/// `POST /repositories`: validate, then store a new instance.
///
/// The name is checked first, so a taken or empty name never reaches the
/// bucket.
pub async fn create_instance(
    State(service): State<InstanceService>,
    Json(req): Json<InstanceReq>,
) -> Result<Response, AppError> {
    match service.register(&req.name, &req.form).await? {
        Registration::Created(instance, config) => Ok((
            StatusCode::CREATED,
            Json(InstanceResponse::new(instance, &config)),
        )
            .into_response()),
        Registration::Rejected(errors) => Ok(ValidationFailed(errors).into_response()),
    }
}

/// `GET /repositories/{id}`
pub async fn get_instance(
    State(service): State<InstanceService>,
    Path(id): Path<Uuid>,
) -> Result<Json<InstanceResponse>, AppError> {
    let instance = service.get_instance(id).await?;
    let config = service.load_config(id).await?;
    Ok(Json(InstanceResponse::new(instance, &config)))
}

/// `DELETE /repositories/{id}`
pub async fn delete_instance(
    State(service): State<InstanceService>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    service.delete_instance(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /repositories/{id}/listing?path=&page=`
pub async fn listing(
    State(service): State<InstanceService>,
    Path(id): Path<Uuid>,
    Query(q): Query<ListingQuery>,
) -> Result<Json<ListingResponse>, AppError> {
    if let Some(page) = &q.page {
        debug!("ignoring page {} for dynamically loaded listing", page);
    }
    let (_, repository) = service.open(id).await?;
    let listing = repository.list(&q.path).await?;
    Ok(Json(ListingResponse::new(
        &repository.config().bucket_name,
        listing,
    )))
}

/// `POST /repositories/{id}/fetch`: copy an object into the download area.
pub async fn fetch_file(
    State(service): State<InstanceService>,
    Path(id): Path<Uuid>,
    Json(req): Json<FetchReq>,
) -> Result<Json<FetchResponse>, AppError> {
    let dest = service
        .download_path(id, &req.local_name, &req.key)
        .ok_or_else(|| AppError::bad_request(format!("no usable file name for `{}`", req.key)))?;

    let (_, repository) = service.open(id).await?;
    let size = repository.fetch(&req.key, &dest).await?;

    Ok(Json(FetchResponse {
        path: dest.display().to_string(),
        url: file_url(id, &req.key),
        source: repository.source_info(&req.key),
        size,
    }))
}

/// `GET /repositories/{id}/files/{*key}`: redirect to a presigned URL.
pub async fn serve_redirect(
    State(service): State<InstanceService>,
    Path((id, key)): Path<(Uuid, String)>,
) -> Result<Response, AppError> {
    let (_, repository) = service.open(id).await?;
    let url = repository.presign(&key, service.settings.presign_ttl).await?;
    let location = HeaderValue::from_str(&url)
        .map_err(|e| AppError::internal(format!("presigned URL is not a valid header: {}", e)))?;

    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(header::LOCATION, location);
    Ok(response)
}

/// Path of the redirect route for `key`, each segment percent-encoded.
fn file_url(id: Uuid, key: &str) -> String {
    let encoded = key
        .trim_start_matches('/')
        .split('/')
        .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/");
    format!("/repositories/{}/files/{}", id, encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use percent_encoding::percent_decode_str;

    #[test]
    fn file_url_escapes_reserved_characters() {
        let id = Uuid::nil();
        let url = file_url(id, "/reports/Q1 #2?.pdf");
        assert_eq!(
            url,
            format!("/repositories/{}/files/reports/Q1%20%232%3F.pdf", id)
        );

        let prefix = format!("/repositories/{}/files/", id);
        let key = url.strip_prefix(&prefix).unwrap();
        assert_eq!(
            percent_decode_str(key).decode_utf8().unwrap(),
            "reports/Q1 #2?.pdf"
        );
    }

    #[test]
    fn file_url_keeps_plain_keys_readable() {
        let url = file_url(Uuid::nil(), "docs/2025/report-v1_final~.pdf");
        assert!(url.ends_with("/files/docs/2025/report-v1_final~.pdf"));
        let url = file_url(Uuid::nil(), "na\u{ef}ve.txt");
        assert!(url.ends_with("/files/na%C3%AFve.txt"));
    }
}
