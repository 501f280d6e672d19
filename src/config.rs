use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::services::{instance_service::ServiceSettings, repository::RepositoryPolicy};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub download_dir: String,
    pub presign_ttl_secs: u64,
    pub force_download: bool,
    pub default_credentials: bool,
    pub endpoint_url: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Amazon S3 bucket repository for a host file picker")]
pub struct Args {
    /// Host to bind to (overrides S3BUCKET_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides S3BUCKET_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL for instance settings (overrides S3BUCKET_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory fetched files are written to (overrides S3BUCKET_DOWNLOAD_DIR)
    #[arg(long)]
    pub download_dir: Option<String>,

    /// Lifetime of presigned URLs in seconds (overrides S3BUCKET_PRESIGN_TTL_SECS)
    #[arg(long)]
    pub presign_ttl_secs: Option<u64>,

    /// Ask browsers to save presigned downloads (overrides S3BUCKET_FORCE_DOWNLOAD)
    #[arg(long)]
    pub force_download: Option<bool>,

    /// Let instances without an access key use the default AWS credential chain
    #[arg(long)]
    pub default_credentials: bool,

    /// S3-compatible endpoint URL, e.g. MinIO (overrides S3BUCKET_ENDPOINT_URL)
    #[arg(long)]
    pub endpoint_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("S3BUCKET_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("S3BUCKET_PORT", 3000u16)?;
        let env_db = env::var("S3BUCKET_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/repositories.db".into());
        let env_downloads =
            env::var("S3BUCKET_DOWNLOAD_DIR").unwrap_or_else(|_| "./data/downloads".into());
        let env_ttl = env_or("S3BUCKET_PRESIGN_TTL_SECS", 300u64)?;
        let env_force_download = env_or("S3BUCKET_FORCE_DOWNLOAD", true)?;
        let env_default_credentials = env_or("S3BUCKET_DEFAULT_CREDENTIALS", false)?;
        let env_endpoint_url = env::var("S3BUCKET_ENDPOINT_URL")
            .ok()
            .filter(|v| !v.is_empty());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            download_dir: args.download_dir.unwrap_or(env_downloads),
            presign_ttl_secs: args.presign_ttl_secs.unwrap_or(env_ttl),
            force_download: args.force_download.unwrap_or(env_force_download),
            default_credentials: args.default_credentials || env_default_credentials,
            endpoint_url: args.endpoint_url.or(env_endpoint_url),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            download_dir: PathBuf::from(&self.download_dir),
            presign_ttl: Duration::from_secs(self.presign_ttl_secs),
            policy: RepositoryPolicy {
                allow_default_credentials: self.default_credentials,
                force_download: self.force_download,
            },
            endpoint_url: self.endpoint_url.clone(),
        }
    }
}

/// Read and parse an environment variable, falling back when it is unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
