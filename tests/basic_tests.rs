use rekeydb::{CodecConfig, Database, DatabaseError, Error};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use tempfile::NamedTempFile;

const KEY: &[u8] = b"01234567890123456789012345678901";

fn aes() -> CodecConfig {
    CodecConfig::encrypted("aes-256-gcm", "SHA256", "KDF_SHA256", KEY, 1000, 1024)
}

fn overwrite(path: &std::path::Path, offset: u64, data: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(data).unwrap();
}

#[test]
fn create_insert_reopen() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    let mut db = Database::create(tmpfile.path()).unwrap();
    assert_eq!(db.page_count(), 1);
    db.insert(b"hello").unwrap();
    db.insert(b"world").unwrap();
    db.close();

    let db = Database::open(tmpfile.path()).unwrap();
    assert_eq!(db.row_count(), 2);
    assert_eq!(db.rows().unwrap(), vec![b"hello".to_vec(), b"world".to_vec()]);
    db.verify_integrity().unwrap();
}

#[test]
fn large_rows_span_pages() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    let mut db = Database::builder()
        .set_codec(aes())
        .create(tmpfile.path())
        .unwrap();
    let big = vec![0xAB; 5000];
    db.insert(&big).unwrap();
    db.insert(b"").unwrap();
    assert!(db.page_count() > 5);
    db.close();

    let db = Database::builder()
        .set_codec(aes())
        .open(tmpfile.path())
        .unwrap();
    assert_eq!(db.rows().unwrap(), vec![big, vec![]]);
    db.verify_integrity().unwrap();
}

#[test]
fn encrypted_file_has_no_plaintext() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    let mut db = Database::builder()
        .set_codec(aes())
        .create(tmpfile.path())
        .unwrap();
    db.insert(b"very secret row content").unwrap();
    db.close();

    let raw = std::fs::read(tmpfile.path()).unwrap();
    assert!(!raw
        .windows(b"secret".len())
        .any(|window| window == b"secret"));
}

#[test]
fn wrong_key() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    drop(
        Database::builder()
            .set_codec(aes())
            .create(tmpfile.path())
            .unwrap(),
    );

    match Database::builder()
        .set_codec(aes().with_key(&[7u8; 32]))
        .open(tmpfile.path())
    {
        Err(DatabaseError::NotADatabase(_)) => {}
        other => panic!("expected NotADatabase, got {other:?}"),
    }

    match Database::open(tmpfile.path()) {
        Err(DatabaseError::NotADatabase(_)) => {}
        other => panic!("expected NotADatabase, got {other:?}"),
    }
}

#[test]
fn encrypting_config_on_plaintext_file() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    drop(Database::create(tmpfile.path()).unwrap());

    match Database::builder()
        .set_codec(aes())
        .open(tmpfile.path())
    {
        Err(DatabaseError::NotADatabase(_)) => {}
        other => panic!("expected NotADatabase, got {other:?}"),
    }
}

#[test]
fn corrupt_header() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    drop(
        Database::builder()
            .set_codec(aes())
            .create(tmpfile.path())
            .unwrap(),
    );
    overwrite(tmpfile.path(), 0, b"SQLite format 3\0");

    match Database::builder()
        .set_codec(aes())
        .open(tmpfile.path())
    {
        Err(DatabaseError::NotADatabase(_)) => {}
        other => panic!("expected NotADatabase, got {other:?}"),
    }
}

#[test]
fn tampered_header_field() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    let mut db = Database::create(tmpfile.path()).unwrap();
    db.insert(b"row").unwrap();
    db.close();
    // row count
    overwrite(tmpfile.path(), 48, &[9]);

    match Database::open(tmpfile.path()) {
        Err(DatabaseError::NotADatabase(_)) => {}
        other => panic!("expected NotADatabase, got {other:?}"),
    }
}

#[test]
fn corrupt_page() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    let mut db = Database::builder()
        .set_codec(aes())
        .create(tmpfile.path())
        .unwrap();
    db.insert(&[1u8; 3000]).unwrap();
    db.close();
    overwrite(tmpfile.path(), 2 * 1024 + 100, &[0x55; 8]);

    let db = Database::builder()
        .set_codec(aes())
        .open(tmpfile.path())
        .unwrap();
    assert!(db.read_page(1).is_ok());
    match db.read_page(2) {
        Err(Error::Corrupted(_)) => {}
        other => panic!("expected Corrupted, got {other:?}"),
    }
    assert!(matches!(db.rows(), Err(Error::Corrupted(_))));
    assert!(matches!(db.verify_integrity(), Err(Error::Corrupted(_))));
}

#[test]
fn truncated_file() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    let mut db = Database::builder()
        .set_codec(aes())
        .create(tmpfile.path())
        .unwrap();
    db.insert(&[1u8; 3000]).unwrap();
    db.close();
    let len = std::fs::metadata(tmpfile.path()).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(tmpfile.path())
        .unwrap()
        .set_len(len - 1024)
        .unwrap();

    match Database::builder()
        .set_codec(aes())
        .open(tmpfile.path())
    {
        Err(DatabaseError::NotADatabase(_)) => {}
        other => panic!("expected NotADatabase, got {other:?}"),
    }
}

#[test]
fn invalid_config_before_io() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    match Database::builder()
        .set_codec(aes().with_kdf_iter(0))
        .create(&path)
    {
        Err(DatabaseError::InvalidConfig(_)) => {}
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
    assert!(!path.exists());
}

#[test]
fn page_size() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    let db = Database::builder()
        .set_page_size(512)
        .create(tmpfile.path())
        .unwrap();
    assert_eq!(db.page_size(), 512);
    db.close();
    assert_eq!(std::fs::metadata(tmpfile.path()).unwrap().len(), 512);

    // Unencrypted files keep the page size they were created with
    let db = Database::open(tmpfile.path()).unwrap();
    assert_eq!(db.page_size(), 512);
}

#[test]
fn read_only() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    let mut db = Database::create(tmpfile.path()).unwrap();
    db.insert(b"hello").unwrap();
    db.close();

    let mut reader = Database::builder()
        .set_read_only(true)
        .open(tmpfile.path())
        .unwrap();
    let second = Database::builder()
        .set_read_only(true)
        .open(tmpfile.path())
        .unwrap();
    assert!(reader.is_read_only());
    assert_eq!(second.rows().unwrap(), vec![b"hello".to_vec()]);
    match reader.insert(b"world") {
        Err(Error::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied),
        other => panic!("expected Io, got {other:?}"),
    }
    assert!(matches!(
        Database::open(tmpfile.path()),
        Err(DatabaseError::Busy)
    ));
}

#[test]
fn second_writer_is_busy() {
    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    let db = Database::create(tmpfile.path()).unwrap();
    assert!(matches!(
        Database::open(tmpfile.path()),
        Err(DatabaseError::Busy)
    ));
    assert!(matches!(
        Database::builder()
            .set_read_only(true)
            .open(tmpfile.path()),
        Err(DatabaseError::Busy)
    ));
    db.close();
    assert!(Database::open(tmpfile.path()).is_ok());
}

#[test]
fn open_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    match Database::open(dir.path().join("missing")) {
        Err(DatabaseError::Storage(_)) => {}
        other => panic!("expected Storage, got {other:?}"),
    }
}

#[test]
fn random_rows() {
    use rand::prelude::*;

    let mut rng = StdRng::seed_from_u64(0);
    let rows: Vec<Vec<u8>> = (0..200)
        .map(|_| {
            let len = rng.gen_range(0..600);
            (0..len).map(|_| rng.gen()).collect()
        })
        .collect();

    let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
    let mut db = Database::builder()
        .set_codec(aes())
        .create(tmpfile.path())
        .unwrap();
    for row in &rows {
        db.insert(row).unwrap();
    }
    db.close();

    let db = Database::builder()
        .set_codec(aes())
        .open(tmpfile.path())
        .unwrap();
    assert_eq!(db.rows().unwrap(), rows);
}
