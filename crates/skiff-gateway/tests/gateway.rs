//! End-to-end scenarios driving both protocol front ends against the
//! in-memory backend.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use skiff_core::{Error, ObjectPath, ObjectStore};
use skiff_gateway::ftp::FtpError;
use skiff_gateway::memstore::MemStore;
use skiff_gateway::sftp::{OpenFlags, SftpSession, SftpStatus};
use skiff_gateway::session::global_semaphore;
use skiff_gateway::{ConnectionPool, FtpShell, ObjectFilesystem, SessionRegistry};

const WRITE_CREATE: OpenFlags = OpenFlags {
    read: false,
    write: true,
    create: true,
    truncate: false,
};

const READ: OpenFlags = OpenFlags {
    read: true,
    write: false,
    create: false,
    truncate: false,
};

fn pool() -> ConnectionPool {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    ConnectionPool::new(global_semaphore(100), 10)
}

fn ftp_shell(store: &Arc<MemStore>, registry: &Arc<SessionRegistry>) -> FtpShell<MemStore> {
    let fs = ObjectFilesystem::new(Arc::clone(store));
    FtpShell::login(fs, registry, pool(), "alice", false).unwrap()
}

fn sftp_session(store: &Arc<MemStore>, registry: &Arc<SessionRegistry>) -> SftpSession<MemStore> {
    let fs = ObjectFilesystem::new(Arc::clone(store));
    SftpSession::login(fs, registry, pool(), "alice").unwrap()
}

async fn ftp_upload(shell: &FtpShell<MemStore>, path: &str, data: &[u8]) {
    let (mut upload, _slot) = shell
        .open_for_writing(path, Some(data.len() as u64))
        .await
        .unwrap();
    if !data.is_empty() {
        upload.push(Bytes::copy_from_slice(data)).await.unwrap();
    }
    upload.finish().await.unwrap();
}

async fn ftp_download(shell: &FtpShell<MemStore>, path: &str) -> Vec<u8> {
    let (tx, mut rx) = mpsc::channel(16);
    shell.retrieve(path, 0, tx).await.unwrap();
    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        out.extend_from_slice(&chunk);
    }
    out
}

#[tokio::test]
async fn zero_byte_object_lists_and_downloads() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);

    shell.make_directory("/t").await.unwrap();
    ftp_upload(&shell, "/t/a", b"").await;

    let rows = shell.list("/t").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "a");
    assert_eq!(rows[0].1.size, 0);
    assert!(!rows[0].1.is_dir);

    assert_eq!(ftp_download(&shell, "/t/a").await, b"");
}

#[tokio::test]
async fn marker_directory_conflict_then_removal() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);

    shell.make_directory("/t").await.unwrap();
    shell.make_directory("/t/d").await.unwrap();
    ftp_upload(&shell, "/t/d/x", b"payload").await;

    let err = shell.remove_directory("/t/d").await.unwrap_err();
    assert_eq!(err.reply_code(), 504);

    shell.remove_file("/t/d/x").await.unwrap();
    shell.remove_directory("/t/d").await.unwrap();
    assert!(shell.list("/t").await.unwrap().is_empty());
}

#[tokio::test]
async fn rename_replaces_old_name_in_listing() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);

    shell.make_directory("/t").await.unwrap();
    ftp_upload(&shell, "/t/a", b"data").await;
    shell.rename("/t/a", "/t/a1").await.unwrap();

    let names: Vec<String> = shell
        .list("/t")
        .await
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["a1"]);
    assert_eq!(ftp_download(&shell, "/t/a1").await, b"data");
}

#[tokio::test]
async fn rename_of_directory_with_children_is_unsupported() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);

    shell.make_directory("/t").await.unwrap();
    shell.make_directory("/t/b").await.unwrap();
    ftp_upload(&shell, "/t/b/nested", b"x").await;

    let err = shell.rename("/t/b", "/t/b1").await.unwrap_err();
    assert_eq!(err.reply_code(), 504);
    // Nothing moved
    let names: Vec<String> = shell
        .list("/t")
        .await
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["b"]);
}

#[tokio::test]
async fn rename_missing_source_is_not_found_even_when_destination_exists() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);

    shell.make_directory("/t").await.unwrap();
    ftp_upload(&shell, "/t/existing", b"x").await;

    assert_eq!(
        shell.rename("/t/gone", "/t/existing").await.unwrap_err(),
        FtpError::FileNotFound
    );
    assert_eq!(
        shell.rename("/t/gone", "/t/fresh").await.unwrap_err(),
        FtpError::FileNotFound
    );
}

#[tokio::test]
async fn root_mutations_rejected_on_both_fronts() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);
    let session = sftp_session(&store, &registry);

    assert_eq!(shell.make_directory("/").await.unwrap_err().reply_code(), 504);
    assert_eq!(shell.rename("/", "/x").await.unwrap_err().reply_code(), 504);

    assert_eq!(
        session.make_directory("/").await.unwrap_err().status,
        SftpStatus::OpUnsupported
    );
    assert_eq!(
        session.rename("/", "/x").await.unwrap_err().status,
        SftpStatus::OpUnsupported
    );
    // Root removal is absorbed nowhere: it is unsupported, not cleanup
    assert_eq!(
        session.remove_directory("/").await.unwrap_err().status,
        SftpStatus::OpUnsupported
    );
}

#[tokio::test]
async fn listing_is_single_level_and_duplicate_free() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);

    shell.make_directory("/t").await.unwrap();
    shell.make_directory("/t/d").await.unwrap();
    ftp_upload(&shell, "/t/d/one", b"1").await;
    ftp_upload(&shell, "/t/d/sub/deep", b"2").await;
    ftp_upload(&shell, "/t/top", b"3").await;

    let names: Vec<String> = shell
        .list("/t")
        .await
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["d", "top"]);

    let names: Vec<String> = shell
        .list("/t/d")
        .await
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["one", "sub"]);
}

#[tokio::test]
async fn session_cap_shared_across_protocols() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(2);

    let ftp = ftp_shell(&store, &registry);
    let _sftp = sftp_session(&store, &registry);

    // Third session for the same user refused on either front
    let fs = ObjectFilesystem::new(Arc::clone(&store));
    assert!(FtpShell::login(fs, &registry, pool(), "alice", false).is_err());
    let fs = ObjectFilesystem::new(Arc::clone(&store));
    assert!(SftpSession::login(fs, &registry, pool(), "alice").is_err());

    // A different user is unaffected
    let fs = ObjectFilesystem::new(Arc::clone(&store));
    let _bob = FtpShell::login(fs, &registry, pool(), "bob", false).unwrap();

    // Releasing one slot admits a new session
    drop(ftp);
    let fs = ObjectFilesystem::new(Arc::clone(&store));
    let _replacement = SftpSession::login(fs, &registry, pool(), "alice").unwrap();
}

#[tokio::test]
async fn upload_byte_accounting_enforced_over_ftp() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);
    shell.make_directory("/t").await.unwrap();

    let (mut upload, _slot) = shell.open_for_writing("/t/f", Some(3)).await.unwrap();
    let err = upload.push(Bytes::from_static(b"more than three")).await.unwrap_err();
    assert!(err.is_transport());
    assert!(store.object_bytes("t", "f").is_none());
}

#[tokio::test]
async fn cross_protocol_visibility() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);
    let session = sftp_session(&store, &registry);

    shell.make_directory("/shared").await.unwrap();
    let mut handle = session.open_file("/shared/doc", WRITE_CREATE).await.unwrap();
    handle
        .write_chunk(0, Bytes::from_static(b"written over sftp"))
        .await
        .unwrap();
    handle.close().await.unwrap();

    assert_eq!(ftp_download(&shell, "/shared/doc").await, b"written over sftp");

    shell.rename("/shared/doc", "/shared/doc2").await.unwrap();
    let mut handle = session.open_file("/shared/doc2", READ).await.unwrap();
    let chunk = handle.read_chunk(0, 64).await.unwrap();
    assert_eq!(chunk, Bytes::from_static(b"written over sftp"));
}

#[tokio::test]
async fn implied_directory_survives_without_marker() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);

    shell.make_directory("/t").await.unwrap();
    ftp_upload(&shell, "/t/implied/leaf", b"x").await;

    // No marker object exists, only the deeper object
    let fs = ObjectFilesystem::new(Arc::clone(&store));
    let stat = fs
        .get_attrs(&ObjectPath::parse("/t/implied").unwrap())
        .await
        .unwrap();
    assert!(stat.is_dir);

    // Removing the implied directory while the child exists conflicts
    assert!(matches!(
        fs.remove_directory(&ObjectPath::parse("/t/implied").unwrap())
            .await,
        Err(Error::Conflict(_))
    ));
}

#[tokio::test]
async fn resumed_download_over_ftp() {
    let store = Arc::new(MemStore::new());
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);

    shell.make_directory("/t").await.unwrap();
    ftp_upload(&shell, "/t/f", b"hello world").await;

    let (tx, mut rx) = mpsc::channel(16);
    let sent = shell.retrieve("/t/f", 6, tx).await.unwrap();
    assert_eq!(sent, 5);
    assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"world"));
}

#[tokio::test]
async fn listing_pages_through_large_containers() {
    let store = Arc::new(MemStore::with_page_size(7));
    let registry = SessionRegistry::new(0);
    let shell = ftp_shell(&store, &registry);

    shell.make_directory("/t").await.unwrap();
    for i in 0..50 {
        let body: skiff_core::ByteStream =
            Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(b"x"))]));
        store.put_object("t", &format!("obj{i:03}"), None, body).await.unwrap();
    }
    let rows = shell.list("/t").await.unwrap();
    assert_eq!(rows.len(), 50);
}
