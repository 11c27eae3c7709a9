//! The public operation surface: ingestion, weights, explanation, health.

mod common;

use common::{seed_vector, test_service};
use vecmatch::api::CreateEmbeddingRequest;
use vecmatch::engine::MatchRequest;
use vecmatch::storage::VectorStore;
use vecmatch::types::{Category, EntityType, record_id};
use vecmatch::weights::{MatchWeights, WEIGHT_SUM_EPSILON};

fn ingest(entity_id: &str, entity_type: EntityType, category: Category, text: &str) -> CreateEmbeddingRequest {
    CreateEmbeddingRequest {
        entity_id: entity_id.to_string(),
        entity_type,
        text: text.to_string(),
        category,
        metadata: None,
    }
}

/// Re-ingesting the same (entity, type, category) leaves exactly one
/// record, stored under the deterministic id.
#[tokio::test]
async fn reingestion_overwrites_instead_of_accumulating() {
    let (service, store) = test_service();

    for text in [
        "ten years of backend engineering with rust and postgres",
        "recently moved into platform work: kubernetes, terraform, golang",
    ] {
        service
            .create_embedding_record(ingest("c-7", EntityType::Candidate, Category::Skills, text))
            .await
            .unwrap();
    }

    assert_eq!(store.len(), 1);
    let stored = store
        .get(&record_id(EntityType::Candidate, "c-7", Category::Skills))
        .await
        .unwrap()
        .expect("the overwritten record exists under the deterministic id");
    assert_eq!(stored.entity_id, "c-7");
}

/// Text length bounds are enforced on the trimmed input.
#[tokio::test]
async fn text_length_bounds() {
    let (service, _) = test_service();

    // 9 characters after trimming: rejected
    let err = service
        .create_embedding_record(ingest(
            "c-1",
            EntityType::Candidate,
            Category::Skills,
            "  too short  ",
        ))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), "VALIDATION_ERROR");

    // Exactly 10 characters: accepted
    service
        .create_embedding_record(ingest("c-1", EntityType::Candidate, Category::Skills, "abcdefghij"))
        .await
        .unwrap();
}

/// UpdateWeights then GetWeights yields weights summing to 1 and
/// proportional to the raw input.
#[tokio::test]
async fn update_then_get_weights_is_proportional() {
    let (service, _) = test_service();

    let raw = MatchWeights::new(0.2, 0.2, 0.1, 0.5);
    let updated = service.update_weights(raw).unwrap();
    let current = service.get_weights();

    assert_eq!(updated, current);
    assert!((current.sum() - 1.0).abs() < WEIGHT_SUM_EPSILON);
    // Proportionality: ratios match the raw input
    assert!((current.salary / current.skills - 2.5).abs() < 1e-9);
    assert!((current.skills - current.career).abs() < 1e-9);
}

/// The weight vector a match call reports is the one it actually used.
#[tokio::test]
async fn match_response_echoes_weights_used() {
    let (service, store) = test_service();
    seed_vector(&store, "c-1", EntityType::Candidate, Category::Skills, vec![1.0, 0.0]).await;
    seed_vector(&store, "v-1", EntityType::Vacancy, Category::Skills, vec![1.0, 0.0]).await;

    service
        .update_weights(MatchWeights::new(0.7, 0.1, 0.1, 0.1))
        .unwrap();
    let response = service.find_matches(MatchRequest::new("c-1")).await.unwrap();
    assert!((response.weights_used.skills - 0.7).abs() < 1e-9);
}

/// Explanations carry key factors above 0.3 and suggestions for weak
/// categories, computed from the pair's current scores.
#[tokio::test]
async fn explanation_reflects_pair_scores() {
    let (service, store) = test_service();
    seed_vector(&store, "c-1", EntityType::Candidate, Category::Skills, vec![1.0, 0.0]).await;
    seed_vector(&store, "c-1", EntityType::Candidate, Category::Culture, vec![0.0, 1.0]).await;
    seed_vector(&store, "v-1", EntityType::Vacancy, Category::Skills, vec![1.0, 0.0]).await;
    // Orthogonal culture vectors: weak category
    seed_vector(&store, "v-1", EntityType::Vacancy, Category::Culture, vec![1.0, 0.0]).await;

    let explanation = service.get_explanation("c-1", "v-1").await.unwrap();

    // Skills scored 1.0 and is the leading key factor
    assert!(explanation.key_factors[0].starts_with("technical skills"));
    // Culture, career, and salary all scored below 0.5
    let suggestions = explanation.suggestions.expect("weak categories present");
    assert!(!suggestions.is_empty());
    assert!(suggestions.len() <= 5);
    assert!(!explanation.text.is_empty());
}

/// Health check reports each subsystem and rolls the statuses up.
#[tokio::test]
async fn health_check_reports_subsystems() {
    let (service, _) = test_service();
    let report = service.health_check().await;

    assert_eq!(report.services.len(), 3);
    for key in ["vector_store", "embedding_provider", "weights"] {
        let status = report.services.get(key).expect("subsystem present");
        assert!(status.starts_with("healthy"), "{key}: {status}");
    }
}
