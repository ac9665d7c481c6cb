// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Recovery Tests
//!
//! This module tests what the file backend does when it is reopened on a
//! data directory left behind by an interrupted or damaged run:
//! - Leftover temp files from interrupted writes
//! - Damaged lines in buckets.csv and objects.csv
//! - Directories without index records, and records without blobs

use bytes::Bytes;
use s3lite::storage::file_storage::FileStorage;
use s3lite::storage::{StorageBackend, StorageError};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;

/// Test fixture owning a data directory that can be reopened
struct RecoveryTestFixture {
    _temp_dir: TempDir,
    root: PathBuf,
}

impl RecoveryTestFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    async fn open(&self) -> FileStorage {
        FileStorage::new(&self.root).await.unwrap()
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    async fn append(&self, rel: &str, text: &str) {
        let path = self.path(rel);
        let mut current = fs::read_to_string(&path).await.unwrap_or_default();
        current.push_str(text);
        fs::write(&path, current).await.unwrap();
    }
}

async fn seed(storage: &FileStorage) {
    storage.create_bucket("alpha").await.unwrap();
    storage.create_bucket("beta").await.unwrap();
    storage
        .put_object("alpha", "docs/readme.txt", Bytes::from("read me"), Some("text/plain"))
        .await
        .unwrap();
    storage
        .put_object("alpha", "raw.bin", Bytes::from(vec![1u8, 2, 3]), None)
        .await
        .unwrap();
}

/// Interrupted blob writes leave files in .tmp; reopening clears them
#[tokio::test]
async fn test_leftover_temp_files_are_swept() {
    let fixture = RecoveryTestFixture::new();
    seed(&fixture.open().await).await;

    fs::write(fixture.path(".tmp/3f2a-partial"), b"half a blob")
        .await
        .unwrap();
    fs::write(fixture.path(".buckets.csv.tmp"), b"Name,Crea")
        .await
        .unwrap();

    let storage = fixture.open().await;
    assert!(!fixture.path(".tmp/3f2a-partial").exists());
    assert_eq!(storage.list_buckets().await.unwrap().len(), 2);

    // The stale index temp file is simply overwritten by the next rewrite
    storage.create_bucket("gamma").await.unwrap();
    assert!(!fixture.path(".buckets.csv.tmp").exists());
}

/// Damaged index lines are skipped, the rest of the index still loads
#[tokio::test]
async fn test_damaged_index_lines_are_skipped() {
    let fixture = RecoveryTestFixture::new();
    seed(&fixture.open().await).await;

    fixture
        .append("buckets.csv", "half-written-bucket,2024-01-01T00:\n")
        .await;
    fixture
        .append("alpha/objects.csv", "broken,notanumber,text/plain,2024-01-01T00:00:00Z\n")
        .await;

    let storage = fixture.open().await;
    let names: Vec<_> = storage
        .list_buckets()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    let objects = storage.list_objects("alpha").await.unwrap();
    assert_eq!(objects.len(), 2);
    let (data, meta) = storage.get_object("alpha", "docs/readme.txt").await.unwrap();
    assert_eq!(data, Bytes::from("read me"));
    assert_eq!(meta.content_type, "text/plain");

    // The next write rewrites the index without the damaged line
    storage
        .put_object("alpha", "new", Bytes::from("n"), None)
        .await
        .unwrap();
    let text = fs::read_to_string(fixture.path("alpha/objects.csv")).await.unwrap();
    assert!(!text.contains("broken"));
}

/// A bucket directory with no record does not show up, and is reclaimed
/// when that name is created
#[tokio::test]
async fn test_orphan_directory_is_reclaimed() {
    let fixture = RecoveryTestFixture::new();
    seed(&fixture.open().await).await;

    fs::create_dir_all(fixture.path("orphan/old")).await.unwrap();
    fs::write(fixture.path("orphan/old/blob"), b"leftover").await.unwrap();

    let storage = fixture.open().await;
    assert!(!storage.bucket_exists("orphan").await.unwrap());
    assert!(matches!(
        storage.get_object("orphan", "old/blob").await,
        Err(StorageError::BucketNotFound(_))
    ));

    storage.create_bucket("orphan").await.unwrap();
    assert!(!fixture.path("orphan/old").exists());
    assert!(storage.list_objects("orphan").await.unwrap().is_empty());
}

/// An object record whose blob vanished is reported as an internal error,
/// and can still be deleted
#[tokio::test]
async fn test_record_without_blob() {
    let fixture = RecoveryTestFixture::new();
    seed(&fixture.open().await).await;

    fs::remove_file(fixture.path("alpha/raw.bin")).await.unwrap();

    let storage = fixture.open().await;
    assert!(matches!(
        storage.get_object("alpha", "raw.bin").await,
        Err(StorageError::Internal(_))
    ));

    storage.delete_object("alpha", "raw.bin").await.unwrap();
    assert!(matches!(
        storage.get_object("alpha", "raw.bin").await,
        Err(StorageError::ObjectNotFound { .. })
    ));
}

/// Writes made before a reopen are visible after it, byte for byte
#[tokio::test]
async fn test_reopen_preserves_everything() {
    let fixture = RecoveryTestFixture::new();
    let before = {
        let storage = fixture.open().await;
        seed(&storage).await;
        storage.list_objects("alpha").await.unwrap()
    };

    let storage = fixture.open().await;
    assert_eq!(storage.list_objects("alpha").await.unwrap(), before);
    assert!(storage.list_objects("beta").await.unwrap().is_empty());
    assert!(dir_is_empty(&fixture.path(".tmp")).await);
}

async fn dir_is_empty(path: &Path) -> bool {
    let mut rd = fs::read_dir(path).await.unwrap();
    rd.next_entry().await.unwrap().is_none()
}
