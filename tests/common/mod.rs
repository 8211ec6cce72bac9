//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use invoice_vault::backup::Artifact;
use invoice_vault::config::AppConfig;
use invoice_vault::fault_point::FaultInjector;
use invoice_vault::service::{ErrorKind, UploadedArtifact, VaultService};
use invoice_vault::store::StoreHandle;
use tempfile::TempDir;
use walkdir::WalkDir;

pub const TOKEN: &str = "test-admin-token";

pub struct Vault {
    pub temp: TempDir,
    pub config: AppConfig,
    pub service: VaultService,
}

impl Vault {
    pub fn root(&self) -> &Path {
        self.temp.path()
    }
}

pub fn open_vault() -> Vault {
    open_vault_with(FaultInjector::disabled())
}

pub fn open_vault_with(faults: FaultInjector) -> Vault {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = AppConfig::new(temp.path()).with_admin_token(TOKEN);
    let service = VaultService::open(&config)
        .expect("Failed to open vault")
        .with_faults(faults);
    Vault {
        temp,
        config,
        service,
    }
}

/// A second service over the same data root, with different faults.
pub fn reopen_with(vault: &Vault, faults: FaultInjector) -> VaultService {
    VaultService::new(&vault.config, std::sync::Arc::clone(vault.service.store())).with_faults(faults)
}

pub fn add_company(store: &StoreHandle, name: &str) {
    store
        .with_conn(|c| c.execute("INSERT INTO companies (name) VALUES (?1)", [name]))
        .unwrap();
}

pub fn seed_invoice(store: &StoreHandle) {
    store
        .with_conn(|c| {
            c.execute_batch(
                "INSERT INTO companies (name) VALUES ('Acme');
                 INSERT INTO clients (name) VALUES ('Globex');
                 INSERT INTO invoices (invoice_number, company_id, client_id) VALUES ('INV-001', 1, 1);
                 INSERT INTO invoice_items (invoice_id, title) VALUES (1, 'Consulting');
                 INSERT INTO invoice_item_details (item_id, description) VALUES (1, 'Workshop day');",
            )
        })
        .unwrap();
}

pub fn company_names(store: &StoreHandle) -> Vec<String> {
    store
        .with_conn(|c| {
            let mut stmt = c.prepare("SELECT name FROM companies ORDER BY id")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            rows.collect()
        })
        .unwrap()
}

pub fn count(store: &StoreHandle, table: &str) -> i64 {
    store
        .with_conn(|c| c.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0)))
        .unwrap()
}

pub fn write_upload(vault: &Vault, relative: &str, bytes: &[u8]) {
    let path = vault.service.layout().uploads_dir().join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

/// Relative paths of every regular file under `dir`.
pub fn file_set(dir: &Path) -> BTreeSet<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(dir)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

pub fn temp_entries(vault: &Vault) -> usize {
    fs::read_dir(vault.service.layout().temp_dir())
        .unwrap()
        .count()
}

pub fn rollback_copies(vault: &Vault) -> Vec<std::path::PathBuf> {
    fs::read_dir(vault.service.layout().data_dir())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.to_string_lossy().contains(".db.backup-"))
        .collect()
}

pub async fn collect(artifact: Artifact) -> Vec<u8> {
    let mut body = artifact.body;
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk.unwrap());
    }
    bytes
}

pub fn zip_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn zip_entry(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut out = Vec::new();
    entry.read_to_end(&mut out).unwrap();
    out
}

/// Place `bytes` where an upload would have been spooled.
pub fn stage_upload(vault: &Vault, original_name: &str, bytes: &[u8]) -> UploadedArtifact {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let path = vault.service.layout().upload_spool_file(extension);
    fs::write(&path, bytes).unwrap();
    UploadedArtifact {
        path,
        original_name: original_name.to_string(),
    }
}

/// Bytes deflate cannot shrink.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

/// Wait until the operation slot is free again.
pub async fn wait_until_idle(service: &VaultService) {
    for _ in 0..400 {
        match service.download_database_backup().await {
            Ok(_) => return,
            Err(e) if e.kind() == ErrorKind::OperationInProgress => {
                tokio::time::sleep(Duration::from_millis(10)).await
            }
            Err(e) => panic!("unexpected error while waiting: {:?}", e),
        }
    }
    panic!("operation slot still taken");
}
