//! End-to-end scenarios against the upload engine

use std::path::Path;
use std::time::Duration;

use axum::body::Bytes;
use tempfile::TempDir;

use evidence_intake::upload::{
    ChunkOutcome, ChunkRequest, FinalizeOutcome, HashEngine, MetadataRecord, MetadataStore, RetryPolicy,
    UploadError, UploadService, UploadSettings,
};

fn service(root: &Path) -> UploadService {
    UploadService::new(UploadSettings {
        chunk_write_retry: RetryPolicy::exponential(3, Duration::ZERO),
        rename_retry: RetryPolicy::fixed(3, Duration::ZERO),
        ..UploadSettings::with_storage_root(root)
    })
}

fn md5(data: &[u8]) -> String {
    HashEngine::default().hash_bytes(data)
}

fn chunk(name: &str, index: usize, total: usize, size: u64, data: &[u8]) -> ChunkRequest {
    ChunkRequest {
        file_name: name.to_string(),
        chunk_index: index,
        total_chunks: total,
        chunk_size: size,
        data: Bytes::copy_from_slice(data),
        metadata: None,
    }
}

fn first(name: &str, total: usize, size: u64, data: &[u8], metadata: MetadataRecord) -> ChunkRequest {
    ChunkRequest {
        metadata: Some(metadata),
        ..chunk(name, 0, total, size, data)
    }
}

fn case_metadata(hash: &str) -> MetadataRecord {
    MetadataRecord {
        folder_name: Some("case1".to_string()),
        original_file_hash: Some(hash.to_string()),
        operation: Some("Op Harbor".to_string()),
        item_number: Some("12".to_string()),
        ..Default::default()
    }
}

fn three_chunks() -> Vec<Vec<u8>> {
    (0..3u8).map(|i| vec![b'a' + i; 100]).collect()
}

fn expect_finalized(outcome: ChunkOutcome) -> FinalizeOutcome {
    match outcome {
        ChunkOutcome::Finalized(outcome) => outcome,
        other => panic!("expected finalize, got {:?}", other),
    }
}

#[tokio::test]
async fn test_three_chunk_upload_commits_verified_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let service = service(temp_dir.path());
    let chunks = three_chunks();
    let whole = chunks.concat();
    let hash = md5(&whole);

    let r0 = service
        .process_chunk(first("evidence.bin", 3, 100, &chunks[0], case_metadata(&hash)))
        .await
        .unwrap();
    assert!(matches!(r0, ChunkOutcome::Received { chunks_received: 1, .. }));
    service
        .process_chunk(chunk("evidence.bin", 1, 3, 100, &chunks[1]))
        .await
        .unwrap();
    let last = service
        .process_chunk(chunk("evidence.bin", 2, 3, 100, &chunks[2]))
        .await
        .unwrap();

    let FinalizeOutcome::Completed(report) = expect_finalized(last) else {
        panic!("expected success");
    };
    assert!(report.success);
    assert!(report.verified);
    assert_eq!(report.new_hash, hash);
    assert_eq!(report.original_hash, hash);
    assert!(report.new_filename.ends_with("_complete.bin"));
    assert_eq!(report.file_size, 300);

    let folder = temp_dir.path().join("case1");
    assert_eq!(std::fs::read(folder.join(&report.new_filename)).unwrap(), whole);
    assert!(!folder.join("evidence.bin").exists());
    assert_eq!(service.registry().session_count().await, 0);
    assert_eq!(service.registry().file_lock_count().await, 0);

    let stored = MetadataStore::new().load(&folder, "evidence.bin").await.unwrap();
    assert_eq!(stored.processing_completed, Some(true));
    assert_eq!(stored.verified, Some(true));
    assert_eq!(stored.item_number.as_deref(), Some("12"));
    assert_eq!(stored.final_file_hash.as_deref(), Some(hash.as_str()));
}

#[tokio::test]
async fn test_truncated_transfer_leaves_nothing_behind() {
    let temp_dir = TempDir::new().unwrap();
    let service = service(temp_dir.path());
    let chunks = three_chunks();
    let hash = md5(&chunks.concat());

    service
        .process_chunk(first("short.bin", 3, 100, &chunks[0], case_metadata(&hash)))
        .await
        .unwrap();
    service
        .process_chunk(chunk("short.bin", 1, 3, 100, &chunks[1]))
        .await
        .unwrap();
    let last = service
        .process_chunk(chunk("short.bin", 2, 3, 100, &chunks[2][..40]))
        .await
        .unwrap();

    let FinalizeOutcome::Failed(failure) = expect_finalized(last) else {
        panic!("expected failure");
    };
    assert!(!failure.success);
    assert!(!failure.verified);
    assert_eq!(failure.code, "INTEGRITY_ERROR");

    let folder = temp_dir.path().join("case1");
    assert!(!folder.join("short.bin").exists());
    assert!(!folder.join("short_complete.bin").exists());
    assert!(!folder.join("short.bin_metadata.json").exists());
    assert_eq!(service.registry().session_count().await, 0);
}

#[tokio::test]
async fn test_resent_chunk_is_a_no_op() {
    let temp_dir = TempDir::new().unwrap();
    let service = service(temp_dir.path());
    let chunks = three_chunks();
    let hash = md5(&chunks.concat());

    service
        .process_chunk(first("dup.bin", 3, 100, &chunks[0], case_metadata(&hash)))
        .await
        .unwrap();
    service
        .process_chunk(chunk("dup.bin", 1, 3, 100, &chunks[1]))
        .await
        .unwrap();

    let resent = service
        .process_chunk(chunk("dup.bin", 1, 3, 100, &[b'z'; 100]))
        .await
        .unwrap();
    assert!(matches!(resent, ChunkOutcome::AlreadyProcessed { chunk_index: 1 }));

    let partial = std::fs::read(temp_dir.path().join("case1").join("dup.bin")).unwrap();
    assert_eq!(partial, [chunks[0].clone(), chunks[1].clone()].concat());

    let last = service
        .process_chunk(chunk("dup.bin", 2, 3, 100, &chunks[2]))
        .await
        .unwrap();
    assert!(expect_finalized(last).is_success());
}

#[tokio::test]
async fn test_out_of_order_chunks_assemble_by_index() {
    let temp_dir = TempDir::new().unwrap();
    let service = service(temp_dir.path());
    let chunks = three_chunks();
    let whole = chunks.concat();

    service
        .process_chunk(first("mixed.bin", 3, 100, &chunks[0], case_metadata(&md5(&whole))))
        .await
        .unwrap();
    service
        .process_chunk(chunk("mixed.bin", 2, 3, 100, &chunks[2]))
        .await
        .unwrap();
    let last = service
        .process_chunk(chunk("mixed.bin", 1, 3, 100, &chunks[1]))
        .await
        .unwrap();

    let FinalizeOutcome::Completed(report) = expect_finalized(last) else {
        panic!("expected success");
    };
    assert_eq!(
        std::fs::read(temp_dir.path().join("case1").join(report.new_filename)).unwrap(),
        whole
    );
}

#[tokio::test]
async fn test_idle_session_expires_but_chunk_zero_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let service = UploadService::new(UploadSettings {
        idle_timeout: Duration::from_millis(50),
        chunk_write_retry: RetryPolicy::exponential(3, Duration::ZERO),
        rename_retry: RetryPolicy::fixed(3, Duration::ZERO),
        ..UploadSettings::with_storage_root(temp_dir.path())
    });
    let chunks = three_chunks();
    let whole = chunks.concat();

    service
        .process_chunk(first("slow.bin", 3, 100, &chunks[0], case_metadata(&md5(&whole))))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    let late = service
        .process_chunk(chunk("slow.bin", 1, 3, 100, &chunks[1]))
        .await;
    assert!(matches!(late, Err(UploadError::SessionExpired(_))));

    // the partial artifact survives eviction
    assert!(temp_dir.path().join("case1").join("slow.bin").exists());

    service
        .process_chunk(first("slow.bin", 3, 100, &chunks[0], case_metadata(&md5(&whole))))
        .await
        .unwrap();
    service
        .process_chunk(chunk("slow.bin", 1, 3, 100, &chunks[1]))
        .await
        .unwrap();
    let last = service
        .process_chunk(chunk("slow.bin", 2, 3, 100, &chunks[2]))
        .await
        .unwrap();
    assert!(expect_finalized(last).is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_on_one_session_never_interleave() {
    let temp_dir = TempDir::new().unwrap();
    let service = service(temp_dir.path());
    const TOTAL: usize = 16;
    const SIZE: usize = 4096;

    let chunks: Vec<Vec<u8>> = (0..TOTAL).map(|i| vec![i as u8; SIZE]).collect();
    let whole = chunks.concat();

    service
        .process_chunk(first("shared.bin", TOTAL, SIZE as u64, &chunks[0], case_metadata(&md5(&whole))))
        .await
        .unwrap();

    let mut writers = Vec::new();
    for start in [1usize, 2] {
        let service = service.clone();
        let chunks = chunks.clone();
        writers.push(tokio::spawn(async move {
            let mut outcomes = Vec::new();
            for index in (start..TOTAL).step_by(2) {
                let outcome = service
                    .process_chunk(chunk("shared.bin", index, TOTAL, SIZE as u64, &chunks[index]))
                    .await
                    .unwrap();
                outcomes.push(outcome);
            }
            outcomes
        }));
    }

    let mut finalized = Vec::new();
    for writer in futures::future::join_all(writers).await {
        for outcome in writer.unwrap() {
            if let ChunkOutcome::Finalized(outcome) = outcome {
                finalized.push(outcome);
            }
        }
    }

    assert_eq!(finalized.len(), 1);
    let FinalizeOutcome::Completed(report) = finalized.remove(0) else {
        panic!("expected success");
    };
    assert_eq!(
        std::fs::read(temp_dir.path().join("case1").join(report.new_filename)).unwrap(),
        whole
    );
}

#[tokio::test]
async fn test_parallel_uploads_to_different_files() {
    let temp_dir = TempDir::new().unwrap();
    let service = service(temp_dir.path());

    let uploads = ["left.bin", "right.bin"].map(|name| {
        let service = service.clone();
        async move {
            let chunks = three_chunks();
            let hash = md5(&chunks.concat());
            service
                .process_chunk(first(name, 3, 100, &chunks[0], case_metadata(&hash)))
                .await?;
            service.process_chunk(chunk(name, 1, 3, 100, &chunks[1])).await?;
            let last = service.process_chunk(chunk(name, 2, 3, 100, &chunks[2])).await?;
            Ok::<_, UploadError>(last)
        }
    });

    for outcome in futures::future::join_all(uploads).await {
        assert!(expect_finalized(outcome.unwrap()).is_success());
    }

    let folder = temp_dir.path().join("case1");
    assert!(folder.join("left_complete.bin").exists());
    assert!(folder.join("right_complete.bin").exists());
}

#[tokio::test]
async fn test_requested_rename_collision_keeps_original() {
    let temp_dir = TempDir::new().unwrap();
    let service = service(temp_dir.path());
    let folder = temp_dir.path().join("case1");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("exhibit_a.bin"), b"already filed").unwrap();

    let data = b"fresh evidence";
    let metadata = MetadataRecord {
        rename_file: Some(true),
        requested_filename: Some("exhibit_a.bin".to_string()),
        ..case_metadata(&md5(data))
    };

    let outcome = service
        .process_chunk(first("upload.bin", 1, 0, data, metadata))
        .await
        .unwrap();

    let FinalizeOutcome::Failed(failure) = expect_finalized(outcome) else {
        panic!("expected failure");
    };
    assert_eq!(failure.code, "COLLISION_ERROR");
    assert_eq!(std::fs::read(folder.join("upload.bin")).unwrap(), data);
    assert_eq!(std::fs::read(folder.join("exhibit_a.bin")).unwrap(), b"already filed");

    let status = service.processing_status("case1", "upload.bin").await.unwrap();
    assert!(!status.completed);
    assert!(status.verified);
    assert!(status.error.is_some());
}

#[tokio::test]
async fn test_requested_rename_then_completion_tag() {
    let temp_dir = TempDir::new().unwrap();
    let service = service(temp_dir.path());
    let data = b"laptop image";
    let metadata = MetadataRecord {
        rename_file: Some(true),
        requested_filename: Some("item 4 laptop.E01".to_string()),
        ..case_metadata(&md5(data))
    };

    let outcome = service
        .process_chunk(first("tmp_upload.E01", 1, 0, data, metadata))
        .await
        .unwrap();

    let FinalizeOutcome::Completed(report) = expect_finalized(outcome) else {
        panic!("expected success");
    };
    assert_eq!(report.original_filename, "tmp_upload.E01");
    assert_eq!(report.new_filename, "item_4_laptop_complete.E01");

    let folder = temp_dir.path().join("case1");
    assert!(folder.join("item_4_laptop_complete.E01").exists());
    assert!(folder.join("item_4_laptop_complete.E01_metadata.json").exists());
    assert!(!folder.join("tmp_upload.E01").exists());
    assert!(!folder.join("tmp_upload.E01_metadata.json").exists());
}
