use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

/// Which `BlobStorage` implementation the server runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Process-local map; contents vanish on exit.
    Memory,
    /// SQLite metadata plus payload files on local disk.
    Disk,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "disk" => Ok(Self::Disk),
            other => anyhow::bail!("unknown backend `{}` (expected memory or disk)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub storage_dir: String,
    pub database_url: String,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Blob storage development server")]
pub struct Args {
    /// Host to bind to (overrides BLOB_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BLOB_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides BLOB_STORE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Directory where object payloads are stored (overrides BLOB_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides BLOB_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Per-request storage deadline in milliseconds (overrides BLOB_STORE_REQUEST_TIMEOUT_MS)
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,

    /// Largest accepted upload in bytes (overrides BLOB_STORE_MAX_BODY_BYTES)
    #[arg(long)]
    pub max_body_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name))?;
        Ok((cfg, migrate))
    }

    /// Merge CLI arguments over values looked up through `lookup`, falling
    /// back to built-in defaults.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        // --- Environment fallback ---
        let env_host = lookup("BLOB_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "BLOB_STORE_PORT", 3000u16)?;
        let env_backend = parse_var(&lookup, "BLOB_STORE_BACKEND", BackendKind::Memory)?;
        let env_storage =
            lookup("BLOB_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = lookup("BLOB_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/blob_store.db".into());
        let env_timeout = parse_var(&lookup, "BLOB_STORE_REQUEST_TIMEOUT_MS", 30_000u64)?;
        let env_max_body = parse_var(&lookup, "BLOB_STORE_MAX_BODY_BYTES", 64 * 1024 * 1024usize)?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            request_timeout: Duration::from_millis(args.request_timeout_ms.unwrap_or(env_timeout)),
            max_body_bytes: args.max_body_bytes.unwrap_or(env_max_body),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
