use anyhow::{Context, Result, bail};
use chrono::TimeDelta;
use clap::{Parser, Subcommand, ValueEnum};
use std::{env, path::PathBuf, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments, then gets passed
/// explicitly into the pipeline and the server.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub location: String,
    pub resource_group: String,
    pub web_app_name: String,
    pub linux_fx_version: String,
    pub account_name: String,
    pub account_key: Option<String>,
    pub container: String,
    pub blob_name: String,
    pub sas_valid_hours: i64,
    pub blob_endpoint_suffix: String,
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            location: "northcentralus".into(),
            resource_group: "a7-python-webapp-rg2".into(),
            web_app_name: "a7webapp2".into(),
            linux_fx_version: "PYTHON|3.9".into(),
            account_name: "devstoreaccount1".into(),
            account_key: None,
            container: "deployments".into(),
            blob_name: "app.zip".into(),
            sas_valid_hours: 24,
            blob_endpoint_suffix: "blob.core.windows.net".into(),
            host: "0.0.0.0".into(),
            port: 3000,
            storage_dir: "./data/blobs".into(),
            database_url: "sqlite://./data/meta/runpack.db".into(),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Package a web app and publish it as a signed run-from-package URL")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug, Default)]
pub struct GlobalArgs {
    /// Region for declared resources (overrides RUNPACK_LOCATION)
    #[arg(long, global = true)]
    pub location: Option<String>,

    /// Resource group name (overrides RUNPACK_RESOURCE_GROUP)
    #[arg(long, global = true)]
    pub resource_group: Option<String>,

    /// Web app name (overrides RUNPACK_WEB_APP)
    #[arg(long, global = true)]
    pub web_app: Option<String>,

    /// Storage account name (overrides RUNPACK_ACCOUNT)
    #[arg(long, global = true)]
    pub account: Option<String>,

    /// Container holding packages (overrides RUNPACK_CONTAINER)
    #[arg(long, global = true)]
    pub container: Option<String>,

    /// Blob name of the package (overrides RUNPACK_BLOB)
    #[arg(long, global = true)]
    pub blob: Option<String>,

    /// Hours the signed URL stays valid (overrides RUNPACK_SAS_VALID_HOURS)
    #[arg(long, global = true)]
    pub sas_valid_hours: Option<i64>,

    /// Host to bind to (overrides RUNPACK_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides RUNPACK_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides RUNPACK_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides RUNPACK_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Map, archive, upload and sign a source tree
    Publish {
        /// Web application source tree
        #[arg(long)]
        source: PathBuf,

        /// How to print the result
        #[arg(long, value_enum, default_value_t = OutputFormat::Env)]
        format: OutputFormat,
    },
    /// Serve published packages to holders of a valid signed URL
    Serve,
    /// Run migrations and exit
    Migrate,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// `WEBSITE_RUN_FROM_PACKAGE=<url>`
    Env,
    /// Full deployment report including the rendered topology
    Json,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let cli = Cli::parse();
        let cfg = Self::resolve(&cli.global, |key| env::var(key).ok())?;
        Ok((cfg, cli.command))
    }

    /// Merge CLI args over values found through `lookup`, falling back to
    /// defaults.
    pub fn resolve<F>(args: &GlobalArgs, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |arg: &Option<String>, key: &str, default: String| {
            arg.clone().or_else(|| lookup(key)).unwrap_or(default)
        };

        // --- Environment fallback for typed values ---
        let env_port = parse_env(&lookup, "RUNPACK_PORT")?.unwrap_or(defaults.port);
        let env_hours =
            parse_env(&lookup, "RUNPACK_SAS_VALID_HOURS")?.unwrap_or(defaults.sas_valid_hours);

        // --- Merge ---
        let cfg = Self {
            location: string(&args.location, "RUNPACK_LOCATION", defaults.location),
            resource_group: string(
                &args.resource_group,
                "RUNPACK_RESOURCE_GROUP",
                defaults.resource_group,
            ),
            web_app_name: string(&args.web_app, "RUNPACK_WEB_APP", defaults.web_app_name),
            linux_fx_version: lookup("RUNPACK_LINUX_FX_VERSION")
                .unwrap_or(defaults.linux_fx_version),
            account_name: string(&args.account, "RUNPACK_ACCOUNT", defaults.account_name),
            account_key: lookup("RUNPACK_ACCOUNT_KEY").filter(|k| !k.is_empty()),
            container: string(&args.container, "RUNPACK_CONTAINER", defaults.container),
            blob_name: string(&args.blob, "RUNPACK_BLOB", defaults.blob_name),
            sas_valid_hours: args.sas_valid_hours.unwrap_or(env_hours),
            blob_endpoint_suffix: lookup("RUNPACK_BLOB_SUFFIX")
                .unwrap_or(defaults.blob_endpoint_suffix),
            host: string(&args.host, "RUNPACK_HOST", defaults.host),
            port: args.port.unwrap_or(env_port),
            storage_dir: string(&args.storage_dir, "RUNPACK_STORAGE_DIR", defaults.storage_dir),
            database_url: string(
                &args.database_url,
                "RUNPACK_DATABASE_URL",
                defaults.database_url,
            ),
        };

        if cfg.sas_valid_hours <= 0 {
            bail!(
                "signed URL validity must be at least one hour, got {}",
                cfg.sas_valid_hours
            );
        }
        if TimeDelta::try_hours(cfg.sas_valid_hours).is_none() {
            bail!(
                "signed URL validity of {} hours is out of range",
                cfg.sas_valid_hours
            );
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(None),
    }
}
