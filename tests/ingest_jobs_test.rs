//! Queued ingestion tests: folder jobs, partial failure, concurrency,
//! reindex, and durability across restart.

use ragmill::config::{EmbeddingBackendKind, Settings};
use ragmill::service::{IngestRequest, QueryRequest};
use ragmill::types::{DocumentStatus, JobId, JobStatus};
use ragmill::{CollectionSpec, IngestStatus, RagService};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn settings_in(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.data_dir = dir.join("data");
    settings.embedding.backend = EmbeddingBackendKind::Hashing;
    settings.queue.max_concurrent_jobs = 2;
    settings
}

async fn service_in(dir: &Path) -> RagService {
    RagService::start(settings_in(dir)).await.unwrap()
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

async fn wait_for_job(service: &RagService, id: JobId) -> ragmill::IndexJob {
    for _ in 0..400 {
        let job = service.job_status(id).await.unwrap();
        if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {id} did not settle in time");
}

#[tokio::test]
async fn test_folder_ingest_with_one_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let folder = dir.path().join("corpus");
    std::fs::create_dir_all(&folder).unwrap();
    for i in 0..9 {
        write(
            &folder,
            &format!("good-{i}.txt"),
            &format!("Valid document number {i} with its own distinct content."),
        );
    }
    // Undecodable bytes: this one must fail, the rest must not.
    std::fs::write(folder.join("broken.txt"), [0xff, 0xfe, 0x00, 0x9f]).unwrap();

    let job_id = service
        .ingest(IngestRequest::new(folder, collection.id))
        .await
        .unwrap();
    let job = wait_for_job(&service, job_id).await;

    // Partial failure is not job failure.
    assert_eq!(job.status, JobStatus::Completed);
    assert!((job.progress - 1.0).abs() < 1e-6);

    let documents = service.list_documents(collection.id).await.unwrap();
    assert_eq!(documents.len(), 10);

    let indexed = documents
        .iter()
        .filter(|d| d.status == DocumentStatus::Indexed)
        .count();
    let failed: Vec<_> = documents
        .iter()
        .filter(|d| d.status == DocumentStatus::Failed)
        .collect();
    assert_eq!(indexed, 9);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].source_path.ends_with("broken.txt"));
    assert!(failed[0].error.is_some());

    service.shutdown().await;
}

#[tokio::test]
async fn test_folder_ingest_respects_patterns() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let folder = dir.path().join("mixed");
    std::fs::create_dir_all(&folder).unwrap();
    write(&folder, "wanted.md", "# Keep\n\nMarkdown gets indexed.");
    write(&folder, "ignored.log", "log lines that nobody wants indexed");

    let mut request = IngestRequest::new(folder, collection.id);
    request.file_patterns = vec!["*.md".to_string()];
    let job_id = service.ingest(request).await.unwrap();
    wait_for_job(&service, job_id).await;

    let documents = service.list_documents(collection.id).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert!(documents[0].source_path.ends_with("wanted.md"));

    service.shutdown().await;
}

#[tokio::test]
async fn test_twenty_concurrent_ingests_no_lost_updates() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(service_in(dir.path()).await);
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let path = write(
            dir.path(),
            &format!("doc-{i}.txt"),
            &format!("Concurrent ingest payload {i} with unique words {i}{i}."),
        );
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.ingest_document(&path, collection.id).await.unwrap()
        }));
    }

    let mut total_chunks = 0usize;
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Indexed);
        total_chunks += outcome.chunks_created;
    }

    let stats = service.get_collection_stats(collection.id).await.unwrap();
    assert_eq!(stats.document_count, 20);
    assert_eq!(stats.chunk_count, total_chunks as u64);

    let documents = service.list_documents(collection.id).await.unwrap();
    let summed: usize = documents.iter().map(|d| d.chunk_count).sum();
    assert_eq!(summed, total_chunks);

    service.shutdown().await;
}

#[tokio::test]
async fn test_changed_file_reindexes_in_place() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let path = write(dir.path(), "live.txt", "Original content about caching layers.");
    let first = service.ingest_document(&path, collection.id).await.unwrap();

    std::fs::write(&path, "Replaced content about connection pooling.").unwrap();
    let second = service.ingest_document(&path, collection.id).await.unwrap();

    // Same document row, refreshed content.
    assert_eq!(second.document_id, first.document_id);
    assert_eq!(second.status, IngestStatus::Indexed);

    let documents = service.list_documents(collection.id).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].status, DocumentStatus::Indexed);

    // New content is findable; old content is gone from the index.
    let hits = service
        .query(QueryRequest::new(
            "Replaced content about connection pooling.",
            collection.id,
        ))
        .await
        .unwrap();
    assert!(hits.results[0].similarity >= 0.99);

    let stale = service
        .query(QueryRequest::new(
            "Original content about caching layers.",
            collection.id,
        ))
        .await
        .unwrap();
    assert!(stale.results.iter().all(|hit| hit.similarity < 0.99));

    service.shutdown().await;
}

#[tokio::test]
async fn test_explicit_reindex_job_reprocesses_document() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let path = write(dir.path(), "again.txt", "Reindex me without any change.");
    let outcome = service.ingest_document(&path, collection.id).await.unwrap();

    let job_id = service
        .reindex(
            collection.id,
            &outcome.document_id.to_string(),
            ragmill::JobPriority::High,
        )
        .await
        .unwrap();
    let job = wait_for_job(&service, job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let documents = service.list_documents(collection.id).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].status, DocumentStatus::Indexed);
    assert_eq!(documents[0].chunk_count, outcome.chunks_created);

    service.shutdown().await;
}

#[tokio::test]
async fn test_index_survives_restart() {
    let dir = TempDir::new().unwrap();
    let text = "Durable content survives a full process restart.";

    let collection_id = {
        let service = service_in(dir.path()).await;
        let collection = service
            .create_collection("docs", CollectionSpec::default())
            .await
            .unwrap();
        let path = write(dir.path(), "durable.txt", text);
        service.ingest_document(&path, collection.id).await.unwrap();
        service.shutdown().await;
        collection.id
    };

    // A fresh service over the same data directory sees everything.
    let service = service_in(dir.path()).await;
    let collections = service.list_collections().await.unwrap();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].id, collection_id);

    let response = service
        .query(QueryRequest::new(text, collection_id))
        .await
        .unwrap();
    assert!(!response.results.is_empty());
    assert!(response.results[0].similarity >= 0.99);
    assert_eq!(response.results[0].content, text);

    service.shutdown().await;
}

#[tokio::test]
async fn test_oversized_file_rejected_before_read() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings_in(dir.path());
    settings.queue.max_file_size_bytes = 64;
    let service = RagService::start(settings).await.unwrap();
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let path = write(
        dir.path(),
        "big.txt",
        &"way past the configured cap ".repeat(16),
    );
    let err = service
        .ingest_document(&path, collection.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ragmill::RagError::FileTooLarge { .. }));

    // Nothing was recorded for the rejected file.
    let stats = service.get_collection_stats(collection.id).await.unwrap();
    assert_eq!(stats.document_count, 0);

    service.shutdown().await;
}

#[tokio::test]
async fn test_watcher_feeds_queue() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let watched = dir.path().join("watched");
    std::fs::create_dir_all(&watched).unwrap();

    service
        .enable_auto_update(collection.id, watched.clone(), vec!["*.md".to_string()])
        .unwrap();

    // Give the watcher a moment to register, then create a file.
    tokio::time::sleep(Duration::from_millis(200)).await;
    write(&watched, "fresh.md", "# Fresh\n\nWatched content arrives.");

    // The change flows watcher -> queue -> worker -> index.
    let mut indexed = false;
    for _ in 0..400 {
        let documents = service.list_documents(collection.id).await.unwrap();
        if documents
            .iter()
            .any(|d| d.source_path.ends_with("fresh.md") && d.status == DocumentStatus::Indexed)
        {
            indexed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(indexed, "watched file change should be indexed");

    service.shutdown().await;
}
