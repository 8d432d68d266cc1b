use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

use crate::services::retention::RetentionCurve;

/// Smallest and largest accepted generated code length.
pub const MIN_SLUG_LENGTH: u8 = 4;
pub const MAX_SLUG_LENGTH: u8 = 32;

/// How the Size Guard answers a request whose body exceeds `max_body_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SizeLimitResponse {
    /// Tear the connection down without a parseable response.
    Abort,
    /// Answer `413 Payload Too Large` with a `{message}` body.
    Status,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Maximum accepted request body, in bytes.
    pub max_body_size: u64,
    /// Base length of server-generated codes.
    pub slug_length: u8,
    /// Externally visible base URL used in confirmation bodies.
    pub public_url: Option<String>,
    pub size_limit_response: SizeLimitResponse,
    /// Lifetime bounds for files, in seconds. Both must be set to enable the curve.
    pub file_min_age: Option<u64>,
    pub file_max_age: Option<u64>,
    pub sweep_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            storage_dir: "./data/blobs".into(),
            database_url: "sqlite://./data/meta/deaddrop.db".into(),
            max_body_size: 128 * 1024 * 1024,
            slug_length: 8,
            public_url: None,
            size_limit_response: SizeLimitResponse::Abort,
            file_min_age: None,
            file_max_age: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Dead-drop file, paste and short-URL service")]
pub struct Args {
    /// Host to bind to (overrides DEADDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DEADDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where payload blobs are stored (overrides DEADDROP_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DEADDROP_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Maximum request body size in bytes (overrides DEADDROP_MAX_BODY_SIZE)
    #[arg(long)]
    pub max_body_size: Option<u64>,

    /// Length of generated codes (overrides DEADDROP_SLUG_LENGTH)
    #[arg(long)]
    pub slug_length: Option<u8>,

    /// Public base URL for confirmation links (overrides DEADDROP_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Answer to oversized bodies (overrides DEADDROP_SIZE_LIMIT_RESPONSE)
    #[arg(long, value_enum)]
    pub size_limit_response: Option<SizeLimitResponse>,

    /// Shortest file lifetime in seconds (overrides DEADDROP_FILE_MIN_AGE)
    #[arg(long)]
    pub file_min_age: Option<u64>,

    /// Longest file lifetime in seconds (overrides DEADDROP_FILE_MAX_AGE)
    #[arg(long)]
    pub file_max_age: Option<u64>,

    /// Seconds between expiry sweeps (overrides DEADDROP_SWEEP_INTERVAL)
    #[arg(long)]
    pub sweep_interval: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::resolve(args)?, migrate))
    }

    /// Merge parsed arguments over environment values over defaults.
    pub fn resolve(args: Args) -> Result<Self> {
        Self::resolve_with(args, |name| env::var(name))
    }

    /// Same as `resolve`, reading variables through `lookup`.
    pub fn resolve_with<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let defaults = Self::default();
        let env_string = |name: &str| lookup(name).ok();

        let size_limit_response = match args.size_limit_response {
            Some(mode) => mode,
            None => match lookup("DEADDROP_SIZE_LIMIT_RESPONSE") {
                Ok(value) => SizeLimitResponse::from_str(&value, true)
                    .map_err(anyhow::Error::msg)
                    .with_context(|| {
                        format!("parsing DEADDROP_SIZE_LIMIT_RESPONSE value `{}`", value)
                    })?,
                Err(env::VarError::NotPresent) => defaults.size_limit_response,
                Err(err) => return Err(err).context("reading DEADDROP_SIZE_LIMIT_RESPONSE"),
            },
        };

        let sweep_secs = match args.sweep_interval {
            Some(secs) => secs,
            None => env_parse(&lookup, "DEADDROP_SWEEP_INTERVAL")?
                .unwrap_or(defaults.sweep_interval.as_secs()),
        };

        let cfg = Self {
            host: args
                .host
                .or(env_string("DEADDROP_HOST"))
                .unwrap_or(defaults.host),
            port: match args.port {
                Some(port) => port,
                None => env_parse(&lookup, "DEADDROP_PORT")?.unwrap_or(defaults.port),
            },
            storage_dir: args
                .storage_dir
                .or(env_string("DEADDROP_STORAGE_DIR"))
                .unwrap_or(defaults.storage_dir),
            database_url: args
                .database_url
                .or(env_string("DEADDROP_DATABASE_URL"))
                .unwrap_or(defaults.database_url),
            max_body_size: match args.max_body_size {
                Some(size) => size,
                None => env_parse(&lookup, "DEADDROP_MAX_BODY_SIZE")?
                    .unwrap_or(defaults.max_body_size),
            },
            slug_length: match args.slug_length {
                Some(len) => len,
                None => env_parse(&lookup, "DEADDROP_SLUG_LENGTH")?
                    .unwrap_or(defaults.slug_length),
            },
            public_url: args.public_url.or(env_string("DEADDROP_PUBLIC_URL")),
            size_limit_response,
            file_min_age: match args.file_min_age {
                Some(age) => Some(age),
                None => env_parse(&lookup, "DEADDROP_FILE_MIN_AGE")?,
            },
            file_max_age: match args.file_max_age {
                Some(age) => Some(age),
                None => env_parse(&lookup, "DEADDROP_FILE_MAX_AGE")?,
            },
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject combinations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SLUG_LENGTH..=MAX_SLUG_LENGTH).contains(&self.slug_length) {
            bail!(
                "slug length must be between {} and {}, got {}",
                MIN_SLUG_LENGTH,
                MAX_SLUG_LENGTH,
                self.slug_length
            );
        }
        if self.max_body_size == 0 {
            bail!("max body size must be greater than zero");
        }
        if let Some(public_url) = &self.public_url {
            url::Url::parse(public_url)
                .with_context(|| format!("parsing public URL `{}`", public_url))?;
        }
        self.retention_curve()?;
        Ok(())
    }

    /// Build the file retention curve, when both bounds are configured.
    pub fn retention_curve(&self) -> Result<Option<RetentionCurve>> {
        match (self.file_min_age, self.file_max_age) {
            (Some(min), Some(max)) => Ok(Some(RetentionCurve::new(
                min,
                max,
                self.max_body_size,
            )?)),
            (None, None) => Ok(None),
            _ => bail!("file_min_age and file_max_age must be configured together"),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
