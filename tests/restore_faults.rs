//! Restore under injected faults
//!
//! Whatever step fails, the store handle ends up open and usable, the
//! live store file is either the old or the new one, and temporary files
//! are gone. Rollback copies stay on disk.

mod common;

use std::fs;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::*;
use futures_util::StreamExt;
use invoice_vault::fault_point::{points, FaultInjector};
use invoice_vault::service::ErrorKind;
use tokio::time::timeout;

/// Take a database backup holding only "Backed Up", then move the live
/// store on to "Backed Up" + "Live".
async fn backup_then_drift(vault: &Vault) -> Vec<u8> {
    add_company(vault.service.store(), "Backed Up");
    let bytes = collect(vault.service.download_database_backup().await.unwrap()).await;
    add_company(vault.service.store(), "Live");
    bytes
}

async fn assert_store_survives(point: &str, expect_rollback: bool) {
    let vault = open_vault();
    let bytes = backup_then_drift(&vault).await;
    let faulty = reopen_with(&vault, FaultInjector::at(point));

    let err = faulty
        .restore_database(stage_upload(&vault, "invoice-backup.db", &bytes))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RestoreFailed, "fault at {}", point);

    let store = vault.service.store();
    assert!(store.is_open(), "store closed after fault at {}", point);
    store.ping().unwrap();
    assert_eq!(
        company_names(store),
        vec!["Backed Up".to_string(), "Live".to_string()],
        "old store must stay live after fault at {}",
        point
    );
    assert!(!vault.service.layout().incoming_store_file().exists());
    assert_eq!(temp_entries(&vault), 0);

    let rollbacks = rollback_copies(&vault);
    if expect_rollback {
        assert_eq!(rollbacks.len(), 1, "fault at {}", point);
        let conn = rusqlite::Connection::open(&rollbacks[0]).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM companies", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 2);
    } else {
        assert!(rollbacks.is_empty(), "fault at {}", point);
    }
}

#[tokio::test]
async fn test_fault_after_quiesce() {
    assert_store_survives(points::SWAP_AFTER_QUIESCE, false).await;
}

#[tokio::test]
async fn test_fault_after_snapshot() {
    assert_store_survives(points::SWAP_AFTER_SNAPSHOT, true).await;
}

#[tokio::test]
async fn test_fault_during_install() {
    assert_store_survives(points::SWAP_DURING_INSTALL, true).await;
}

#[tokio::test]
async fn test_fault_before_rename() {
    assert_store_survives(points::SWAP_BEFORE_RENAME, true).await;
}

#[tokio::test]
async fn test_store_is_usable_after_fault() {
    let vault = open_vault();
    let bytes = backup_then_drift(&vault).await;
    let faulty = reopen_with(&vault, FaultInjector::at(points::SWAP_DURING_INSTALL));

    faulty
        .restore_database(stage_upload(&vault, "invoice-backup.db", &bytes))
        .await
        .unwrap_err();

    // Writes and a clean retry both work afterwards.
    add_company(vault.service.store(), "After Fault");
    vault
        .service
        .restore_database(stage_upload(&vault, "invoice-backup.db", &bytes))
        .await
        .unwrap();
    assert_eq!(
        company_names(vault.service.store()),
        vec!["Backed Up".to_string()]
    );
}

#[tokio::test]
async fn test_uploads_fault_puts_previous_tree_back() {
    let vault = open_vault();
    write_upload(&vault, "logo.png", b"backed-up");
    let archive = collect(vault.service.download_uploads_backup().await.unwrap()).await;

    fs::remove_file(vault.service.layout().uploads_dir().join("logo.png")).unwrap();
    write_upload(&vault, "current/a.png", b"a");
    write_upload(&vault, "current/b.png", b"b");

    let faulty = reopen_with(&vault, FaultInjector::at(points::UPLOADS_AFTER_CLEAR));
    let err = faulty
        .restore_uploads(stage_upload(&vault, "uploads.zip", &archive))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RestoreFailed);

    let files = file_set(&vault.service.layout().uploads_dir());
    let expected: Vec<String> = vec!["current/a.png".into(), "current/b.png".into()];
    assert_eq!(files.into_iter().collect::<Vec<_>>(), expected);
    assert_eq!(temp_entries(&vault), 0);
}

#[tokio::test]
async fn test_archive_fault_truncates_the_body_and_frees_the_gate() {
    let vault = open_vault_with(FaultInjector::at(points::ARCHIVE_AFTER_FIRST_ENTRY));
    write_upload(&vault, "a.png", b"a");
    write_upload(&vault, "b.png", b"b");

    let mut body = vault.service.download_uploads_backup().await.unwrap().body;
    let mut sent = Vec::new();
    let mut last = None;
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => sent.extend_from_slice(&bytes),
            Err(e) => last = Some(e),
        }
    }
    drop(body);

    assert!(last.is_some(), "a failed archive must not end cleanly");
    assert!(zip::ZipArchive::new(std::io::Cursor::new(sent)).is_err());
    assert_eq!(temp_entries(&vault), 0);

    // The failed download released the operation slot.
    vault.service.reset_all_data().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_restore_keeps_the_slot_until_it_finishes() {
    let vault = open_vault();
    let bytes = backup_then_drift(&vault).await;

    // Hold the store connection so the restore blocks at quiesce.
    let store = Arc::clone(vault.service.store());
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let holder = thread::spawn(move || {
        store
            .with_conn(|_| {
                held_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(())
            })
            .unwrap();
    });
    held_rx.recv().unwrap();

    let upload = stage_upload(&vault, "invoice-backup.db", &bytes);
    let waited = timeout(
        Duration::from_millis(50),
        vault.service.restore_database(upload),
    )
    .await;
    assert!(waited.is_err(), "restore should still be blocked");

    // The caller gave up; the restore itself did not.
    let err = vault.service.reset_all_data().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationInProgress);

    release_tx.send(()).unwrap();
    holder.join().unwrap();
    wait_until_idle(&vault.service).await;

    assert_eq!(
        company_names(vault.service.store()),
        vec!["Backed Up".to_string()]
    );
}
