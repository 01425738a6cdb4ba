//! Integration tests for content sources and the single-flight folder cache.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use common::ScriptedSource;
use remote_drive::{
    CaseSensitivity, ContentSource, DirectoryProvider, DriveError, FileAttributes, NullProvider,
    PlaceholderInfo, VirtualFileProvider,
};
use tempfile::TempDir;

// ============================================================================
// VirtualFileProvider
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups_fetch_once() {
    let source = ScriptedSource::sample();
    source.set_delay(Duration::from_millis(50));
    let provider = Arc::new(VirtualFileProvider::new(
        source.clone(),
        CaseSensitivity::Insensitive,
    ));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let provider = provider.clone();
            tokio::spawn(async move { provider.find_folder("C").await })
        })
        .collect();

    for task in tasks {
        let snapshot = task.await.unwrap().unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
    }
    assert_eq!(source.folder_fetches(), 1);
}

#[tokio::test]
async fn test_missing_folder_fetched_every_time() {
    let source = ScriptedSource::sample();
    let provider = VirtualFileProvider::new(source.clone(), CaseSensitivity::Insensitive);

    assert!(provider.find_folder("nope").await.unwrap().is_none());
    assert!(provider.find_folder("nope").await.unwrap().is_none());
    assert_eq!(source.folder_fetches(), 2);
}

#[tokio::test]
async fn test_cache_key_ignores_case_and_separators() {
    let source = ScriptedSource::sample();
    let provider = VirtualFileProvider::new(source.clone(), CaseSensitivity::Insensitive);

    provider.find_folder("C").await.unwrap();
    let again = provider.find_folder("\\c\\").await.unwrap();
    assert!(again.is_some());
    assert_eq!(source.folder_fetches(), 1);
}

#[tokio::test]
async fn test_sharp_s_folders_cached_separately() {
    let source = ScriptedSource::new();
    source.add_folder(
        "straße",
        vec![PlaceholderInfo::file("straße/german.txt", 1, UNIX_EPOCH)],
    );
    source.add_folder(
        "strasse",
        vec![PlaceholderInfo::file("strasse/english.txt", 2, UNIX_EPOCH)],
    );
    let provider = VirtualFileProvider::new(source.clone(), CaseSensitivity::Insensitive);
    assert_ne!(provider.cache().key("straße"), provider.cache().key("strasse"));

    let german = provider.find_folder("straße").await.unwrap().unwrap();
    let english = provider.find_folder("strasse").await.unwrap().unwrap();
    assert_eq!(&*german.entries()[0].name, "german.txt");
    assert_eq!(&*english.entries()[0].name, "english.txt");
    assert_eq!(source.folder_fetches(), 2);

    // Simple case folding still shares one entry per folder.
    provider.find_folder("STRAßE").await.unwrap();
    assert_eq!(source.folder_fetches(), 2);
}

#[tokio::test]
async fn test_find_placeholder_info_exact_name() {
    let provider =
        VirtualFileProvider::new(ScriptedSource::sample(), CaseSensitivity::Insensitive);

    let info = provider.find_placeholder_info("a.txt").await.unwrap().unwrap();
    assert_eq!(info.size, 5);
    assert!(provider.find_placeholder_info("A.TXT").await.unwrap().is_none());
    assert!(provider.find_placeholder_info("C").await.unwrap().unwrap().is_directory);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let source = ScriptedSource::sample();
    let provider = VirtualFileProvider::new(source.clone(), CaseSensitivity::Insensitive);

    provider.find_folder("").await.unwrap();
    provider.invalidate().await;
    assert!(provider.cache().is_empty());
    provider.find_folder("").await.unwrap();
    assert_eq!(source.folder_fetches(), 2);
}

#[tokio::test]
async fn test_file_data_not_cached() {
    let source = ScriptedSource::sample();
    let provider = VirtualFileProvider::new(source.clone(), CaseSensitivity::Insensitive);

    for _ in 0..2 {
        let data = provider.find_placeholder_data("a.txt", &[], &[]).await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"hello"[..]));
    }
    assert_eq!(source.file_fetches.load(Ordering::SeqCst), 2);
}

// ============================================================================
// DirectoryProvider
// ============================================================================

fn create_source_tree() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("readme.md"), b"# hi").unwrap();
    std::fs::create_dir(temp_dir.path().join("sub")).unwrap();
    std::fs::write(temp_dir.path().join("sub").join("data.bin"), [1u8, 2, 3]).unwrap();
    temp_dir
}

#[tokio::test]
async fn test_directory_provider_lists_root() {
    let temp_dir = create_source_tree();
    let provider = DirectoryProvider::new(temp_dir.path(), "mount");
    provider.start().await.unwrap();

    let mut entries = provider.fetch_folder("").await.unwrap().unwrap();
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].relative_path, "readme.md");
    assert_eq!(entries[0].size, 4);
    assert!(!entries[0].is_directory);
    assert_eq!(entries[1].relative_path, "sub");
    assert!(entries[1].is_directory);
    assert!(entries[1].attributes.contains(FileAttributes::DIRECTORY));
}

#[tokio::test]
async fn test_directory_provider_nested() {
    let temp_dir = create_source_tree();
    let provider = DirectoryProvider::new(temp_dir.path(), "mount");

    let entries = provider.fetch_folder("sub").await.unwrap().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].relative_path, "sub/data.bin");
    assert_eq!(&*entries[0].name, "data.bin");

    let data = provider.fetch_file("sub/data.bin", &[], &[]).await.unwrap();
    assert_eq!(data, Some(vec![1, 2, 3]));
}

#[tokio::test]
async fn test_directory_provider_missing_and_wrong_kind() {
    let temp_dir = create_source_tree();
    let provider = DirectoryProvider::new(temp_dir.path(), "mount");

    assert!(provider.fetch_folder("nope").await.unwrap().is_none());
    assert!(provider.fetch_folder("readme.md").await.unwrap().is_none());
    assert!(provider.fetch_file("sub", &[], &[]).await.unwrap().is_none());
    assert!(provider.fetch_file("nope.txt", &[], &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_directory_provider_rejects_escape() {
    let temp_dir = create_source_tree();
    let provider = DirectoryProvider::new(temp_dir.path().join("sub"), "mount");

    assert!(provider.fetch_folder("..").await.unwrap().is_none());
    assert!(provider.fetch_file("../readme.md", &[], &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_directory_provider_start_requires_directory() {
    let temp_dir = create_source_tree();

    let missing = DirectoryProvider::new(temp_dir.path().join("absent"), "mount");
    assert!(matches!(missing.start().await, Err(DriveError::SourceUnavailable(_))));

    let file = DirectoryProvider::new(temp_dir.path().join("readme.md"), "mount");
    assert!(matches!(file.start().await, Err(DriveError::SourceUnavailable(_))));
}

// ============================================================================
// NullProvider
// ============================================================================

#[tokio::test]
async fn test_null_provider() {
    let provider = NullProvider::new("mount");
    provider.start().await.unwrap();

    assert_eq!(provider.root_path(), std::path::Path::new("mount"));
    assert!(provider.fetch_folder("").await.unwrap().is_none());
    assert!(matches!(
        provider.fetch_file("x", &[], &[]).await,
        Err(DriveError::ContentSource(_))
    ));
    assert!(provider.notification_mappings().is_empty());
}
