//! CLI command implementations
//!
//! Each command loads the configuration, opens the vault and calls the same
//! service operations the HTTP routes use. Results are printed as one JSON
//! object on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::backup::{Artifact, ArtifactScope, SpoolGuard};
use crate::config::AppConfig;
use crate::fault_point::FaultInjector;
use crate::http_server::HttpServer;
use crate::logging::{self, LogFormat};
use crate::restore::validate_extension;
use crate::service::{ServiceError, UploadedArtifact, VaultService};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Parse arguments, set up logging and run the selected command.
pub async fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    logging::init(if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    run_command(cli.command).await
}

/// Run the appropriate command based on CLI args
pub async fn run_command(cmd: Command) -> CliResult<()> {
    let data = match cmd {
        Command::Init { config } => init(&config).await?,
        Command::Serve { config, port } => serve(&config, port).await?,
        Command::Backup {
            config,
            scope,
            output,
        } => backup(&config, scope, &output).await?,
        Command::Restore {
            config,
            scope,
            file,
        } => restore(&config, scope, &file).await?,
        Command::Reset { config, yes } => reset(&config, yes).await?,
    };
    write_response(data)
}

/// Open the vault; `INVOICE_VAULT_FAULT_POINT` arms a fault point.
fn open_vault(config: &AppConfig) -> CliResult<VaultService> {
    Ok(VaultService::open(config)?.with_faults(FaultInjector::from_env()))
}

/// Create `data/`, `uploads/` and `temp/` and bootstrap the schema.
///
/// Safe to run against an initialized root; nothing existing is touched.
pub async fn init(config_path: &Path) -> CliResult<Value> {
    let config = AppConfig::load(config_path)?;
    let existed = config.layout().store_file().exists();
    let service = open_vault(&config)?;

    Ok(json!({
        "data_root": service.layout().root().display().to_string(),
        "store": service.layout().store_file().display().to_string(),
        "created": !existed,
    }))
}

pub async fn serve(config_path: &Path, port: Option<u16>) -> CliResult<Value> {
    let mut config = AppConfig::load(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    let service = Arc::new(open_vault(&config)?);

    HttpServer::new(&config, service)
        .start()
        .await
        .map_err(|e| CliError::serve_failed(e.to_string()))?;

    Ok(json!({ "stopped": true }))
}

/// Write the date-stamped artifact into `output`.
pub async fn backup(config_path: &Path, scope: ArtifactScope, output: &Path) -> CliResult<Value> {
    let config = AppConfig::load(config_path)?;
    let service = open_vault(&config)?;

    let artifact = match scope {
        ArtifactScope::Database => service.download_database_backup().await?,
        ArtifactScope::Uploads => service.download_uploads_backup().await?,
        ArtifactScope::Full => service.download_full_backup().await?,
    };
    let filename = artifact.filename.clone();
    let (path, bytes) = write_artifact(artifact, output).await?;

    tracing::info!(scope = %scope, path = %path.display(), bytes, "backup written");
    Ok(json!({
        "scope": scope.as_str(),
        "filename": filename,
        "path": path.display().to_string(),
        "bytes": bytes,
    }))
}

/// Drain the artifact into `<dir>/<filename>` via a `.part` sibling.
async fn write_artifact(artifact: Artifact, dir: &Path) -> CliResult<(PathBuf, u64)> {
    fs::create_dir_all(dir).await?;
    let target = dir.join(&artifact.filename);
    let partial = SpoolGuard::new(dir.join(format!("{}.part", artifact.filename)));

    let mut file = File::create(partial.path()).await?;
    let mut body = artifact.body;
    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.sync_all().await?;
    drop(file);
    drop(body);

    fs::rename(partial.path(), &target).await?;
    partial.disarm();
    Ok((target, written))
}

/// Restore from a local file. The file is copied under `temp/` first so
/// the operator's copy survives whatever happens.
pub async fn restore(config_path: &Path, scope: ArtifactScope, file: &Path) -> CliResult<Value> {
    let config = AppConfig::load(config_path)?;
    let service = open_vault(&config)?;

    let original_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CliError::io_error(format!("Not a file: {}", file.display())))?
        .to_string();
    validate_extension(scope, &original_name).map_err(ServiceError::from)?;

    let spool = SpoolGuard::new(service.layout().upload_spool_file(scope.extension()));
    fs::copy(file, spool.path())
        .await
        .map_err(|e| CliError::io_error(format!("Failed to read {}: {}", file.display(), e)))?;

    let upload = UploadedArtifact {
        path: spool.disarm(),
        original_name,
    };
    let report = match scope {
        ArtifactScope::Database => service.restore_database(upload).await?,
        ArtifactScope::Uploads => service.restore_uploads(upload).await?,
        ArtifactScope::Full => service.restore_full(upload).await?,
    };

    Ok(json!({
        "scope": scope.as_str(),
        "store_replaced": report.store_replaced,
        "rollback_copy": report.rollback_copy.map(|p| p.display().to_string()),
        "files_restored": report.upload_files,
    }))
}

pub async fn reset(config_path: &Path, yes: bool) -> CliResult<Value> {
    if !yes {
        return Err(CliError::confirmation_required());
    }
    let config = AppConfig::load(config_path)?;
    let service = open_vault(&config)?;

    let report = service.reset_all_data().await?;
    let deleted: Map<String, Value> = report
        .deleted
        .iter()
        .map(|(table, rows)| (table.to_string(), json!(rows)))
        .collect();

    Ok(json!({ "deleted": deleted, "total": report.total() }))
}
