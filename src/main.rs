use anyhow::{Context, Result};
use axum::Router;
use runpack::{
    config::{AppConfig, Command, OutputFormat},
    models::topology::Topology,
    routes::routes,
    services::{
        publisher::{Deployment, PublishSettings, Publisher},
        storage_service::{self, AccountSettings, StorageService},
    },
};
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::debug!("Starting runpack with config: {:?}", redacted(&cfg));

    let pool = connect_metadata_db(&cfg).await?;
    storage_service::run_migrations(&pool).await?;
    if matches!(command, Command::Migrate) {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let account = AccountSettings::from_config(&cfg).context("reading RUNPACK_ACCOUNT_KEY")?;
    let storage = StorageService::new(Arc::new(pool), cfg.storage_dir.clone(), account);

    match command {
        Command::Publish { source, format } => publish(&cfg, storage, &source, format).await,
        Command::Serve => serve(&cfg, storage).await,
        Command::Migrate => Ok(()),
    }
}

#[derive(Serialize)]
struct PublishReport<'a> {
    deployment: &'a Deployment,
    web_app_url: String,
    topology: Topology,
}

async fn publish(
    cfg: &AppConfig,
    storage: StorageService,
    source: &Path,
    format: OutputFormat,
) -> Result<()> {
    let publisher = Publisher::new(
        Arc::new(storage),
        cfg.blob_endpoint_suffix.clone(),
        PublishSettings::from_config(cfg)?,
    );
    let deployment = publisher
        .publish(source)
        .await
        .with_context(|| format!("publishing {}", source.display()))?;
    tracing::info!(
        "published {} assets, package valid until {}",
        deployment.asset_paths.len(),
        deployment.valid_until
    );

    match format {
        OutputFormat::Env => {
            let (name, value) = deployment.app_setting();
            println!("{}={}", name, value);
        }
        OutputFormat::Json => {
            let topology = deployment.apply_to(Topology::from_config(cfg));
            let report = PublishReport {
                deployment: &deployment,
                web_app_url: topology.web_app_url(),
                topology,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

async fn serve(cfg: &AppConfig, storage: StorageService) -> Result<()> {
    if storage.account.key.is_none() {
        tracing::warn!("RUNPACK_ACCOUNT_KEY is not set; every package request will be refused");
    }

    let app: Router = routes::routes().with_state(storage);

    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Serving packages on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Open the SQLite metadata pool, creating the database file if needed.
async fn connect_metadata_db(cfg: &AppConfig) -> Result<sqlx::SqlitePool> {
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    let db_path_obj = Path::new(db_path);
    if let Some(parent) = db_path_obj.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx will not create the file itself without `mode=rwc`.
    if !db_path_obj.exists() {
        fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(db_path_obj)
            .with_context(|| format!("creating database file {}", db_path))?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;
    Ok(pool)
}

fn redacted(cfg: &AppConfig) -> AppConfig {
    let mut cfg = cfg.clone();
    if cfg.account_key.is_some() {
        cfg.account_key = Some("<redacted>".into());
    }
    cfg
}
