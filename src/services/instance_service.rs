//! src/services/instance_service.rs
//!
//! InstanceService: stores repository instances and their settings in
//! SQLite and opens an [`S3Repository`] for a stored instance. Settings use a
//! generic `(instance_id, name, value)` table, one row per option name.

use crate::models::instance::{
    Attachment, FieldError, InstanceConfig, InstanceForm, RepositoryInstance,
};
use crate::services::{
    repository::{FileRepository, RepositoryPolicy, S3Repository},
    s3_client::S3ObjectStore,
    validation::check_form,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("repository instance `{0}` not found")]
    NotFound(Uuid),
    #[error("repository instance name `{0}` is already taken")]
    NameTaken(String),
    #[error("repository instance name must not be empty")]
    EmptyName,
    #[error("repository instance `{id}` has unusable settings: {reason}")]
    Corrupt { id: Uuid, reason: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type InstanceResult<T> = Result<T, InstanceError>;

/// Outcome of [`InstanceService::register`] once the name is accepted.
#[derive(Debug)]
pub enum Registration {
    Created(RepositoryInstance, InstanceConfig),
    Rejected(Vec<FieldError>),
}

/// Host-level settings shared by every instance.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Directory that receives fetched files.
    pub download_dir: PathBuf,
    pub presign_ttl: Duration,
    pub policy: RepositoryPolicy,
    /// Override for S3-compatible services; `None` uses the AWS endpoints.
    pub endpoint_url: Option<String>,
}

#[derive(Clone)]
pub struct InstanceService {
    /// Shared SQLite connection pool holding instances and their settings.
    pub db: Arc<SqlitePool>,

    pub settings: Arc<ServiceSettings>,
}

impl InstanceService {
    pub fn new(db: Arc<SqlitePool>, settings: ServiceSettings) -> Self {
        Self {
            db,
            settings: Arc::new(settings),
        }
    }

    pub async fn list_instances(&self) -> InstanceResult<Vec<RepositoryInstance>> {
        let rows = sqlx::query_as::<_, RepositoryInstance>(
            "SELECT id, name, created_at FROM repository_instances ORDER BY name ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    pub async fn get_instance(&self, id: Uuid) -> InstanceResult<RepositoryInstance> {
        sqlx::query_as::<_, RepositoryInstance>(
            "SELECT id, name, created_at FROM repository_instances WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => InstanceError::NotFound(id),
            other => InstanceError::Sqlx(other),
        })
    }

    /// Insert an instance and all of its settings in one transaction.
    pub async fn create_instance(
        &self,
        name: &str,
        config: &InstanceConfig,
    ) -> InstanceResult<RepositoryInstance> {
        let name = name.trim();
        if name.is_empty() {
            return Err(InstanceError::EmptyName);
        }

        let instance = RepositoryInstance {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        let mut tx = self.db.begin().await?;
        match sqlx::query("INSERT INTO repository_instances (id, name, created_at) VALUES (?, ?, ?)")
            .bind(instance.id)
            .bind(&instance.name)
            .bind(instance.created_at)
            .execute(&mut *tx)
            .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(InstanceError::NameTaken(instance.name));
            }
            Err(err) => return Err(InstanceError::Sqlx(err)),
        }

        for (option, value) in config.to_settings() {
            sqlx::query("INSERT INTO instance_config (instance_id, name, value) VALUES (?, ?, ?)")
                .bind(instance.id)
                .bind(option)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(
            "created repository instance {} ({}) for bucket {}",
            instance.name, instance.id, config.bucket_name
        );
        Ok(instance)
    }

    /// Remove an instance and its settings.
    pub async fn delete_instance(&self, id: Uuid) -> InstanceResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM instance_config WHERE instance_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM repository_instances WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(InstanceError::NotFound(id));
        }
        tx.commit().await?;
        info!("deleted repository instance {}", id);
        Ok(())
    }

    pub async fn load_config(&self, id: Uuid) -> InstanceResult<InstanceConfig> {
        self.get_instance(id).await?;
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT name, value FROM instance_config WHERE instance_id = ?",
        )
        .bind(id)
        .fetch_all(&*self.db)
        .await?;

        let settings: HashMap<String, String> = rows.into_iter().collect();
        InstanceConfig::from_settings(&settings)
            .map_err(|reason| InstanceError::Corrupt { id, reason })
    }

    /// Build the repository for a stored instance. The S3 client is created
    /// here, once, and owned by the returned repository.
    pub async fn open(
        &self,
        id: Uuid,
    ) -> InstanceResult<(RepositoryInstance, S3Repository<S3ObjectStore>)> {
        let instance = self.get_instance(id).await?;
        let config = self.load_config(id).await?;
        let client = S3ObjectStore::connect(&config, self.settings.endpoint_url.as_deref()).await;
        let repository =
            S3Repository::new(instance.name.clone(), config, client, self.settings.policy);
        Ok((instance, repository))
    }

    /// Trimmed `name`, or the reason it cannot name a new instance.
    pub async fn ensure_name_available(&self, name: &str) -> InstanceResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(InstanceError::EmptyName);
        }
        let taken: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM repository_instances WHERE name = ?")
                .bind(name)
                .fetch_optional(&*self.db)
                .await?;
        if taken.is_some() {
            return Err(InstanceError::NameTaken(name.to_string()));
        }
        Ok(name.to_string())
    }

    /// Full validation of a submitted form: field checks, then the bucket
    /// check and attachment uploads against a client built from the form.
    pub async fn validate_form(&self, name: &str, form: &InstanceForm) -> Vec<FieldError> {
        match check_form(form, self.settings.policy.allow_default_credentials) {
            Ok(config) => self.verify(name, &config, &form.attachments).await,
            Err(errors) => {
                debug!("instance form rejected with {} field errors", errors.len());
                errors
            }
        }
    }

    /// Name check, field checks, bucket check and uploads, then the insert.
    ///
    /// Nothing reaches the bucket unless the name is free and every field
    /// passes.
    pub async fn register(
        &self,
        name: &str,
        form: &InstanceForm,
    ) -> InstanceResult<Registration> {
        let name = self.ensure_name_available(name).await?;
        let config = match check_form(form, self.settings.policy.allow_default_credentials) {
            Ok(config) => config,
            Err(errors) => return Ok(Registration::Rejected(errors)),
        };
        let errors = self.verify(&name, &config, &form.attachments).await;
        if !errors.is_empty() {
            return Ok(Registration::Rejected(errors));
        }
        let instance = self.create_instance(&name, &config).await?;
        Ok(Registration::Created(instance, config))
    }

    async fn verify(
        &self,
        name: &str,
        config: &InstanceConfig,
        attachments: &[Attachment],
    ) -> Vec<FieldError> {
        let client = S3ObjectStore::connect(config, self.settings.endpoint_url.as_deref()).await;
        let label = match name.trim() {
            "" => config.bucket_name.clone(),
            trimmed => trimmed.to_string(),
        };
        S3Repository::new(label, config.clone(), client, self.settings.policy)
            .validate_config(attachments)
            .await
    }

    /// Local destination for a file fetched through instance `id`.
    ///
    /// Only the final component of `local_name` is kept, falling back to the
    /// key's own name. Each instance has one directory, so fetching the same
    /// name again replaces the earlier copy.
    pub fn download_path(&self, id: Uuid, local_name: &str, key: &str) -> Option<PathBuf> {
        let file_name = Path::new(local_name)
            .file_name()
            .or_else(|| Path::new(key).file_name())?;
        Some(
            self.settings
                .download_dir
                .join(id.to_string())
                .join(file_name),
        )
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{endpoint::Endpoint, storage_class::StorageClass};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service() -> InstanceService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::run_migrations(&pool).await.unwrap();
        InstanceService::new(
            Arc::new(pool),
            ServiceSettings {
                download_dir: PathBuf::from("/var/tmp/s3bucket"),
                presign_ttl: Duration::from_secs(300),
                policy: RepositoryPolicy::default(),
                endpoint_url: None,
            },
        )
    }

    fn config() -> InstanceConfig {
        InstanceConfig::new("course-files")
            .with_credentials("AKIA", "secret")
            .with_endpoint(Endpoint::parse("s3.eu-central-1.amazonaws.com").unwrap())
            .with_base_path("moodle")
            .with_storage_class(StorageClass::OnezoneIa)
    }

    #[tokio::test]
    async fn create_then_load_round_trips_settings() {
        let service = service().await;
        let created = service.create_instance(" s3bucket 1 ", &config()).await.unwrap();
        assert_eq!(created.name, "s3bucket 1");

        let fetched = service.get_instance(created.id).await.unwrap();
        assert_eq!(fetched.name, "s3bucket 1");
        assert_eq!(service.load_config(created.id).await.unwrap(), config());
        assert_eq!(service.list_instances().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let service = service().await;
        service.create_instance("dup", &config()).await.unwrap();
        let err = service.create_instance("dup", &config()).await.unwrap_err();
        assert!(matches!(err, InstanceError::NameTaken(name) if name == "dup"));
        assert!(matches!(
            service.create_instance("  ", &config()).await,
            Err(InstanceError::EmptyName)
        ));
    }

    #[tokio::test]
    async fn delete_removes_instance_and_settings() {
        let service = service().await;
        let created = service.create_instance("gone", &config()).await.unwrap();
        service.delete_instance(created.id).await.unwrap();

        assert!(matches!(
            service.get_instance(created.id).await,
            Err(InstanceError::NotFound(_))
        ));
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM instance_config")
            .fetch_one(&*service.db)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(matches!(
            service.delete_instance(created.id).await,
            Err(InstanceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_settings_are_reported() {
        let service = service().await;
        let created = service.create_instance("bad", &config()).await.unwrap();
        sqlx::query("UPDATE instance_config SET value = 'nowhere' WHERE name = 'endpoint'")
            .execute(&*service.db)
            .await
            .unwrap();
        assert!(matches!(
            service.load_config(created.id).await,
            Err(InstanceError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn field_errors_short_circuit_validation() {
        let service = service().await;
        let errors = service
            .validate_form("new", &InstanceForm::default())
            .await;
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.field.is_some()));
    }

    #[tokio::test]
    async fn register_checks_the_name_before_the_form() {
        let service = service().await;
        service.create_instance("dup", &config()).await.unwrap();
        let form = InstanceForm {
            bucket_name: Some("course-files".into()),
            access_key: Some("AKIA".into()),
            secret_key: Some("secret".into()),
            ..InstanceForm::default()
        };

        assert!(matches!(
            service.register(" dup ", &form).await,
            Err(InstanceError::NameTaken(name)) if name == "dup"
        ));
        assert!(matches!(
            service.register("", &form).await,
            Err(InstanceError::EmptyName)
        ));
        match service.register("fresh", &InstanceForm::default()).await {
            Ok(Registration::Rejected(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(service.list_instances().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn download_path_is_one_directory_per_instance() {
        let service = service().await;
        let dir = &service.settings.download_dir;
        let id = Uuid::new_v4();

        let path = service
            .download_path(id, "../../etc/passwd", "docs/a.txt")
            .unwrap();
        assert_eq!(path, dir.join(id.to_string()).join("passwd"));

        let first = service.download_path(id, "", "docs/a.txt").unwrap();
        let again = service.download_path(id, "", "other/a.txt").unwrap();
        assert_eq!(first, again);
        assert_eq!(first.file_name().unwrap(), "a.txt");

        let elsewhere = service.download_path(Uuid::new_v4(), "", "docs/a.txt").unwrap();
        assert_ne!(first, elsewhere);

        assert!(service.download_path(id, "..", "..").is_none());
    }
}
