use chrono::Duration;
use uuid::Uuid;

use tessera_selfservice::domain::repository::CodeRepository;
use tessera_selfservice::domain::types::{AddressKind, Channel, FlowKind, FlowType};
use tessera_selfservice::error::SelfServiceError;

use crate::helpers::{Harness, wrong_code};

async fn flow_with_address(h: &Harness) -> (Uuid, tessera_selfservice::domain::types::Address) {
    let flow = h.create_flow(FlowKind::Verification, FlowType::Api).await;
    let (_, address) = h.add_address(AddressKind::Verifiable, Channel::Email, "a@example.com");
    (flow.id, address)
}

#[tokio::test]
async fn should_store_only_the_digest() {
    let h = Harness::new();
    let (flow_id, address) = flow_with_address(&h).await;
    let repo = h.code_repo();

    let issued = repo
        .create_code(
            FlowKind::Verification,
            &h.code_params(flow_id, &address, Duration::hours(1)),
        )
        .await
        .unwrap();

    assert_eq!(issued.raw.len(), 8);
    assert_ne!(issued.code.code_hmac, issued.raw);
    assert!(!issued.code.code_hmac.contains(&issued.raw));
    assert_eq!(issued.code.code_hmac, h.generator.digest(&issued.raw).unwrap());
    assert_eq!(
        repo.count_codes_of_flow(FlowKind::Verification, flow_id)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn should_redeem_code_only_once() {
    let h = Harness::new();
    let (flow_id, address) = flow_with_address(&h).await;
    let repo = h.code_repo();
    let issued = repo
        .create_code(
            FlowKind::Verification,
            &h.code_params(flow_id, &address, Duration::hours(1)),
        )
        .await
        .unwrap();

    let used = repo
        .use_code(FlowKind::Verification, flow_id, &issued.raw)
        .await
        .unwrap();
    assert_eq!(used.id, issued.code.id);
    assert!(used.used_at.is_some());

    let result = repo
        .use_code(FlowKind::Verification, flow_id, &issued.raw)
        .await;
    assert!(
        matches!(result, Err(SelfServiceError::CodeAlreadyUsed)),
        "expected CodeAlreadyUsed, got {result:?}"
    );
}

#[tokio::test]
async fn should_reject_expired_code() {
    let h = Harness::new();
    let (flow_id, address) = flow_with_address(&h).await;
    let repo = h.code_repo();
    let issued = repo
        .create_code(
            FlowKind::Verification,
            &h.code_params(flow_id, &address, Duration::hours(-1)),
        )
        .await
        .unwrap();

    let result = repo
        .use_code(FlowKind::Verification, flow_id, &issued.raw)
        .await;
    assert!(
        matches!(result, Err(SelfServiceError::CodeExpired { .. })),
        "expected CodeExpired, got {result:?}"
    );
}

#[tokio::test]
async fn should_exhaust_flow_after_five_wrong_codes() {
    let h = Harness::new();
    let (flow_id, address) = flow_with_address(&h).await;
    let repo = h.code_repo();
    let issued = repo
        .create_code(
            FlowKind::Verification,
            &h.code_params(flow_id, &address, Duration::hours(1)),
        )
        .await
        .unwrap();
    let wrong = wrong_code(&issued.raw);

    for attempt in 1..=5 {
        let result = repo.use_code(FlowKind::Verification, flow_id, &wrong).await;
        assert!(
            matches!(result, Err(SelfServiceError::CodeNotFound)),
            "attempt {attempt}: expected CodeNotFound, got {result:?}"
        );
    }

    // The correct code no longer helps, now or later.
    for _ in 0..2 {
        let result = repo
            .use_code(FlowKind::Verification, flow_id, &issued.raw)
            .await;
        assert!(
            matches!(result, Err(SelfServiceError::CodeSubmittedTooOften)),
            "expected CodeSubmittedTooOften, got {result:?}"
        );
    }
}

#[tokio::test]
async fn should_count_garbage_input_as_attempts() {
    let h = Harness::new();
    let (flow_id, _) = flow_with_address(&h).await;
    let repo = h.code_repo();

    for _ in 0..5 {
        let _ = repo.use_code(FlowKind::Verification, flow_id, "not-a-code").await;
    }
    let result = repo.use_code(FlowKind::Verification, flow_id, "").await;
    assert!(
        matches!(result, Err(SelfServiceError::CodeSubmittedTooOften)),
        "expected CodeSubmittedTooOften, got {result:?}"
    );
}

#[tokio::test]
async fn should_isolate_codes_between_networks() {
    let h = Harness::new();
    let (flow_id, address) = flow_with_address(&h).await;
    let issued = h
        .code_repo()
        .create_code(
            FlowKind::Verification,
            &h.code_params(flow_id, &address, Duration::hours(1)),
        )
        .await
        .unwrap();

    let other = h.with_nid(Uuid::new_v4());
    let result = other
        .code_repo()
        .use_code(FlowKind::Verification, flow_id, &issued.raw)
        .await;
    assert!(
        matches!(result, Err(SelfServiceError::CodeNotFound)),
        "expected CodeNotFound, got {result:?}"
    );
    assert_eq!(
        other
            .code_repo()
            .count_codes_of_flow(FlowKind::Verification, flow_id)
            .await
            .unwrap(),
        0
    );

    // Still redeemable in its own network.
    assert!(
        h.code_repo()
            .use_code(FlowKind::Verification, flow_id, &issued.raw)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn should_keep_recovery_and_verification_codes_apart() {
    let h = Harness::new();
    let (flow_id, address) = flow_with_address(&h).await;
    let issued = h
        .code_repo()
        .create_code(
            FlowKind::Verification,
            &h.code_params(flow_id, &address, Duration::hours(1)),
        )
        .await
        .unwrap();

    let result = h
        .code_repo()
        .use_code(FlowKind::Recovery, flow_id, &issued.raw)
        .await;
    assert!(
        matches!(result, Err(SelfServiceError::CodeNotFound)),
        "expected CodeNotFound, got {result:?}"
    );
}

#[tokio::test]
async fn should_delete_all_codes_of_flow() {
    let h = Harness::new();
    let (flow_id, address) = flow_with_address(&h).await;
    let repo = h.code_repo();
    let mut raws = vec![];
    for _ in 0..3 {
        let issued = repo
            .create_code(
                FlowKind::Verification,
                &h.code_params(flow_id, &address, Duration::hours(1)),
            )
            .await
            .unwrap();
        raws.push(issued.raw);
    }

    repo.delete_codes_of_flow(FlowKind::Verification, flow_id)
        .await
        .unwrap();
    // Idempotent.
    repo.delete_codes_of_flow(FlowKind::Verification, flow_id)
        .await
        .unwrap();

    assert_eq!(
        repo.count_codes_of_flow(FlowKind::Verification, flow_id)
            .await
            .unwrap(),
        0
    );
    let result = repo.use_code(FlowKind::Verification, flow_id, &raws[0]).await;
    assert!(
        matches!(result, Err(SelfServiceError::CodeNotFound)),
        "expected CodeNotFound, got {result:?}"
    );
}

#[tokio::test]
async fn should_reject_code_of_unknown_flow() {
    let h = Harness::new();
    let result = h
        .code_repo()
        .use_code(FlowKind::Verification, Uuid::new_v4(), "12345678")
        .await;
    assert!(
        matches!(result, Err(SelfServiceError::CodeNotFound)),
        "expected CodeNotFound, got {result:?}"
    );
}

#[tokio::test]
async fn should_not_redeem_the_stored_digest() {
    let h = Harness::new();
    let (flow_id, address) = flow_with_address(&h).await;
    let repo = h.code_repo();
    let issued = repo
        .create_code(
            FlowKind::Verification,
            &h.code_params(flow_id, &address, Duration::hours(1)),
        )
        .await
        .unwrap();

    let result = repo
        .use_code(FlowKind::Verification, flow_id, &issued.code.code_hmac)
        .await;
    assert!(
        matches!(result, Err(SelfServiceError::CodeNotFound)),
        "expected CodeNotFound, got {result:?}"
    );
    // The raw code is still good.
    assert!(
        repo.use_code(FlowKind::Verification, flow_id, &issued.raw)
            .await
            .is_ok()
    );
}
