//! End-to-end pipeline tests: ingest -> embed -> store -> query.
//!
//! Runs on the hashing backend so nothing is downloaded and vectors are
//! deterministic.

use ragmill::config::{EmbeddingBackendKind, Settings};
use ragmill::service::{ContextRequest, DeleteRequest, QueryRequest};
use ragmill::{CollectionSpec, IngestStatus, RagService};
use std::path::Path;
use tempfile::TempDir;

async fn service_in(dir: &Path) -> RagService {
    let mut settings = Settings::default();
    settings.data_dir = dir.join("data");
    settings.embedding.backend = EmbeddingBackendKind::Hashing;
    settings.queue.max_concurrent_jobs = 2;
    RagService::start(settings).await.unwrap()
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_roundtrip_exact_text_is_top_hit() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let text = "Token based retrieval keeps the index fresh.";
    let path = write(dir.path(), "note.txt", text);
    let outcome = service.ingest_document(&path, collection.id).await.unwrap();
    assert_eq!(outcome.status, IngestStatus::Indexed);
    assert_eq!(outcome.chunks_created, 1);

    let response = service
        .query(QueryRequest::new(text, collection.id))
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    let top = &response.results[0];
    assert_eq!(top.content, text);
    assert!(
        top.similarity >= 0.99,
        "exact text should be a near-perfect match, got {}",
        top.similarity
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_reingest_identical_content_is_skipped() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let path = write(dir.path(), "dup.txt", "Same content both times.");
    let first = service.ingest_document(&path, collection.id).await.unwrap();
    assert_eq!(first.status, IngestStatus::Indexed);

    let second = service.ingest_document(&path, collection.id).await.unwrap();
    assert_eq!(second.status, IngestStatus::Skipped);
    assert_eq!(second.document_id, first.document_id);
    assert_eq!(second.chunks_created, 0);

    let stats = service.get_collection_stats(collection.id).await.unwrap();
    assert_eq!(stats.document_count, 1);

    service.shutdown().await;
}

#[tokio::test]
async fn test_markdown_sections_become_chunks() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let content = "# Title\n\nIntro text.\n\n## Section 1\n\nFirst section body.\n\n## Section 2\n\nSecond section body.";
    let path = write(dir.path(), "guide.md", content);
    let outcome = service.ingest_document(&path, collection.id).await.unwrap();
    assert_eq!(outcome.chunks_created, 3);

    let mut request = QueryRequest::new("section body", collection.id);
    // Keep even orthogonal chunks so every section surfaces.
    request.min_similarity = -1.0;
    let mut response = service.query(request).await.unwrap();
    response.results.sort_by_key(|hit| hit.chunk_id);

    let headings: Vec<String> = response
        .results
        .iter()
        .filter_map(|hit| hit.metadata.heading.clone())
        .collect();
    assert_eq!(headings, vec!["Title", "Section 1", "Section 2"]);

    service.shutdown().await;
}

#[tokio::test]
async fn test_relevant_chunk_outranks_unrelated() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let auth = write(
        dir.path(),
        "auth.txt",
        "Authentication uses JSON Web Tokens. The authentication service issues signed tokens after login.",
    );
    let pasta = write(
        dir.path(),
        "pasta.txt",
        "Cook the noodles in salted boiling water, then drain and toss with sauce.",
    );
    service.ingest_document(&auth, collection.id).await.unwrap();
    service.ingest_document(&pasta, collection.id).await.unwrap();

    let mut request = QueryRequest::new("How does authentication work?", collection.id);
    request.min_similarity = -1.0;
    let response = service.query(request).await.unwrap();

    assert_eq!(response.results.len(), 2);
    let first = &response.results[0];
    let second = &response.results[1];
    assert!(first.source_path.ends_with("auth.txt"));
    assert!(
        first.similarity > second.similarity,
        "auth chunk must rank strictly higher: {} vs {}",
        first.similarity,
        second.similarity
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_min_similarity_prunes_after_ranking() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let exact = "Deployment checklist for production rollouts.";
    service
        .ingest_document(&write(dir.path(), "a.txt", exact), collection.id)
        .await
        .unwrap();
    service
        .ingest_document(
            &write(dir.path(), "b.txt", "Gardening tips for spring seedlings."),
            collection.id,
        )
        .await
        .unwrap();

    let mut request = QueryRequest::new(exact, collection.id);
    request.min_similarity = 0.9;
    let response = service.query(request).await.unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].content, exact);

    service.shutdown().await;
}

#[tokio::test]
async fn test_metadata_filters_restrict_results() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let content = "# Install\n\nRun the installer package.\n\n# Configure\n\nEdit the installer settings file.";
    service
        .ingest_document(&write(dir.path(), "setup.md", content), collection.id)
        .await
        .unwrap();

    let mut filters = serde_json::Map::new();
    filters.insert("heading".to_string(), serde_json::json!("Configure"));

    let mut request = QueryRequest::new("installer", collection.id);
    request.metadata_filters = Some(filters);
    let response = service.query(request).await.unwrap();

    assert!(!response.results.is_empty());
    for hit in &response.results {
        assert_eq!(hit.metadata.heading.as_deref(), Some("Configure"));
    }

    service.shutdown().await;
}

#[tokio::test]
async fn test_chunk_indexes_contiguous_and_within_cap() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection(
            "docs",
            CollectionSpec {
                chunk_size: Some(40),
                chunk_overlap: Some(8),
                max_chunk_size: Some(60),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let body = "The quick brown fox jumps over the lazy dog near the river bank. ".repeat(30);
    let path = write(dir.path(), "long.txt", &body);
    let outcome = service.ingest_document(&path, collection.id).await.unwrap();
    assert!(outcome.chunks_created > 1);

    let documents = service.list_documents(collection.id).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].chunk_count, outcome.chunks_created);

    // All chunks surface through a broad query; indexes must be 0..n-1.
    let mut request = QueryRequest::new("quick brown fox", collection.id);
    request.top_k = outcome.chunks_created + 5;
    let mut response = service.query(request).await.unwrap();
    response.results.sort_by_key(|hit| hit.chunk_id);
    assert_eq!(response.results.len(), outcome.chunks_created);

    service.shutdown().await;
}

#[tokio::test]
async fn test_delete_document_empties_both_stores() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let collection = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();

    let keep = write(dir.path(), "keep.txt", "This document stays in the index.");
    let drop = write(dir.path(), "drop.txt", "This document will be deleted soon.");
    service.ingest_document(&keep, collection.id).await.unwrap();
    let doomed = service.ingest_document(&drop, collection.id).await.unwrap();

    let before = service.get_collection_stats(collection.id).await.unwrap();

    let outcome = service
        .delete_document(DeleteRequest {
            collection_id: collection.id,
            document_id: Some(doomed.document_id),
            path: None,
        })
        .await
        .unwrap();
    assert!(outcome.deleted);
    assert_eq!(outcome.chunks_removed, doomed.chunks_created);

    let after = service.get_collection_stats(collection.id).await.unwrap();
    assert_eq!(after.document_count, before.document_count - 1);
    assert_eq!(
        after.chunk_count,
        before.chunk_count - doomed.chunks_created as u64
    );

    // The deleted content no longer matches anything.
    let response = service
        .query(QueryRequest::new(
            "This document will be deleted soon.",
            collection.id,
        ))
        .await
        .unwrap();
    assert!(response.results.iter().all(|hit| !hit
        .source_path
        .ends_with("drop.txt")));

    service.shutdown().await;
}

#[tokio::test]
async fn test_context_respects_budget_and_dedup() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;
    let notes = service
        .create_collection("notes", CollectionSpec::default())
        .await
        .unwrap();
    let wiki = service
        .create_collection("wiki", CollectionSpec::default())
        .await
        .unwrap();

    let shared = "Shared operational guidance on database backup retention.";
    service
        .ingest_document(&write(dir.path(), "n.txt", shared), notes.id)
        .await
        .unwrap();
    service
        .ingest_document(&write(dir.path(), "w.txt", shared), wiki.id)
        .await
        .unwrap();
    service
        .ingest_document(
            &write(
                dir.path(),
                "extra.txt",
                "Backup schedules run nightly with weekly verification.",
            ),
            notes.id,
        )
        .await
        .unwrap();

    let mut request = ContextRequest::new(
        "database backup retention",
        vec![notes.id, wiki.id],
    );
    request.max_tokens = 50;
    let response = service.get_context(request).await.unwrap();

    assert!(response.token_count <= 50);
    assert!(response.chunks_included >= 1);
    assert_eq!(response.sources.len(), response.chunks_included);

    // Identical chunk content from the two collections appears once.
    let occurrences = response.context.matches(shared).count();
    assert_eq!(occurrences, 1);

    service.shutdown().await;
}

#[tokio::test]
async fn test_unknown_ids_are_structured_errors() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;

    let missing = ragmill::CollectionId::new(999);
    let err = service
        .query(QueryRequest::new("anything", missing))
        .await
        .unwrap_err();
    assert!(matches!(err, ragmill::RagError::NotFound { .. }));

    let err = service
        .job_status(ragmill::JobId::new(424242))
        .await
        .unwrap_err();
    assert!(matches!(err, ragmill::RagError::NotFound { .. }));

    service.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_collection_name_rejected() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;

    service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap();
    let err = service
        .create_collection("docs", CollectionSpec::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ragmill::RagError::InvalidConfig(_)));

    service.shutdown().await;
}

#[tokio::test]
async fn test_invalid_chunking_limits_rejected() {
    let dir = TempDir::new().unwrap();
    let service = service_in(dir.path()).await;

    let err = service
        .create_collection(
            "bad",
            CollectionSpec {
                chunk_size: Some(100),
                chunk_overlap: Some(100),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ragmill::RagError::InvalidConfig(_)));

    service.shutdown().await;
}
