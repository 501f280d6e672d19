//! Liveness and readiness for the repository service.
//!
//! Readiness covers what every request depends on: the instance database and
//! a writable download area. Buckets are never contacted here.

use crate::services::instance_service::InstanceService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

const SCRATCH_BODY: &[u8] = b"readyz";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<Result<(), String>> for CheckStatus {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// `GET /readyz`: 200 when the database answers and the download area
/// accepts a write, 503 otherwise.
pub async fn readyz(State(service): State<InstanceService>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", CheckStatus::from(check_database(&service).await));
    checks.insert(
        "download_dir",
        CheckStatus::from(check_download_dir(&service.settings.download_dir).await),
    );

    let ready = checks.values().all(|check| check.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        tracing::warn!("readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

async fn check_database(service: &InstanceService) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(other) => Err(format!("unexpected result: {}", other)),
        Err(err) => Err(err.to_string()),
    }
}

/// Round-trip a small file through `dir`, always removing it afterwards.
async fn check_download_dir(dir: &Path) -> Result<(), String> {
    let scratch = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&scratch, SCRATCH_BODY)
        .await
        .map_err(|e| format!("write {}: {}", scratch.display(), e))?;

    let read_back = fs::read(&scratch).await;
    let removed = fs::remove_file(&scratch).await;
    match read_back {
        Ok(body) if body == SCRATCH_BODY => {}
        Ok(_) => return Err("content mismatch".into()),
        Err(e) => return Err(format!("read {}: {}", scratch.display(), e)),
    }
    removed.map_err(|e| format!("remove {}: {}", scratch.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{instance_service::ServiceSettings, repository::RepositoryPolicy};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::{path::PathBuf, sync::Arc, time::Duration};

    async fn service(download_dir: PathBuf) -> InstanceService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        InstanceService::new(
            Arc::new(pool),
            ServiceSettings {
                download_dir,
                presign_ttl: Duration::from_secs(60),
                policy: RepositoryPolicy::default(),
                endpoint_url: None,
            },
        )
    }

    #[tokio::test]
    async fn ready_with_database_and_writable_dir() {
        let dir = std::env::temp_dir().join(format!("s3bucket-ready-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let response = readyz(State(service(dir.clone()).await)).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn missing_download_dir_is_not_ready() {
        let dir = std::env::temp_dir().join(format!("s3bucket-absent-{}", Uuid::new_v4()));

        let response = readyz(State(service(dir.clone()).await)).await.into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(check_download_dir(&dir).await.unwrap_err().starts_with("write "));
    }
}
