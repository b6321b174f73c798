use alloy_primitives::{eip191_hash_message, Address, PrimitiveSignature};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use meshbridge_api::server::router;
use meshbridge_relayer::custody::{IdentityBinder, MasterKey};
use meshbridge_relayer::destination::mock::SubmissionKind;
use meshbridge_relayer::destination::{DelegateVote, MockDestination};
use meshbridge_relayer::storage::{EventRecord, Storage};
use meshbridge_relayer::votes::VoteService;
use meshbridge_relayer::{EventId, EventKind};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BUYER_KEY: [u8; 32] = [0x11; 32];
const STRANGER_KEY: [u8; 32] = [0x22; 32];

fn delegate() -> String {
    format!("03{}", "5c".repeat(32))
}

fn address_of(private_key: [u8; 32]) -> Address {
    let signing_key = k256::ecdsa::SigningKey::from_slice(&private_key).expect("valid key");
    Address::from_private_key(&signing_key)
}

fn personal_sign(private_key: [u8; 32], message: &str) -> String {
    let signing_key = k256::ecdsa::SigningKey::from_slice(&private_key).expect("valid key");
    let prehash = eip191_hash_message(message.as_bytes());
    let (sig, recid) = signing_key
        .sign_prehash_recoverable(prehash.as_slice())
        .expect("sign message");
    let sig_bytes: [u8; 65] = PrimitiveSignature::from((sig, recid)).into();
    format!("0x{}", hex::encode(sig_bytes))
}

fn signed_body(signer: [u8; 32], claimed: Address, extra: Value) -> Value {
    let message = format!("meshbridge login {}", claimed);
    let mut body = json!({
        "sourceAddress": claimed.to_string(),
        "message": message,
        "signature": personal_sign(signer, &message),
    });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            body.insert(k.clone(), v.clone());
        }
    }
    body
}

struct Harness {
    app: Router,
    storage: Storage,
    destination: Arc<MockDestination>,
    _temp: TempDir,
}

async fn setup() -> Harness {
    let temp = TempDir::new().expect("tempdir");
    let db_url = format!("sqlite://{}", temp.path().join("api-smoke.db").display());
    let storage = Storage::new(&db_url, 5, 1).await.expect("storage connect");
    storage.run_migrations().await.expect("migrations");

    let binder = IdentityBinder::new(MasterKey::from_bytes([0x07; 32]), "hm");
    let purchase = EventRecord {
        event_id: EventId::from_raw("0xabc-0"),
        transaction_hash: "0xabc".to_string(),
        block_number: 1,
        log_index: 0,
        kind: EventKind::TokensBought,
        args: vec![
            address_of(BUYER_KEY).to_string(),
            "1".to_string(),
            "1000000000000000000".to_string(),
            "10".to_string(),
        ],
        user_context: None,
    };
    storage.enqueue(&purchase, &binder).await.expect("enqueue");

    let destination = Arc::new(MockDestination::default());
    let votes = VoteService::new(storage.clone(), binder, destination.clone());

    Harness {
        app: router(votes),
        storage,
        destination,
        _temp: temp,
    }
}

async fn post(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(body).expect("serialize body")))
                .expect("build request"),
        )
        .await
        .expect("request should complete");

    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

#[tokio::test]
async fn health_returns_ok() {
    let harness = setup().await;
    let response = harness
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn wallet_lookup_returns_bound_address() {
    let harness = setup().await;
    let buyer = address_of(BUYER_KEY);
    let binding = harness
        .storage
        .binding_for(&buyer.to_string())
        .await
        .unwrap()
        .expect("binding provisioned on enqueue");

    let (status, body) = post(
        &harness.app,
        "/api/wallet/lookup",
        &signed_body(BUYER_KEY, buyer, json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["destinationAddress"], binding.destination_address);
    assert!(body.get("encryptedMnemonic").is_none());
}

#[tokio::test]
async fn mismatched_signature_is_rejected_without_side_effects() {
    let harness = setup().await;
    let buyer = address_of(BUYER_KEY);

    let (status, body) = post(
        &harness.app,
        "/api/voting/vote",
        &signed_body(STRANGER_KEY, buyer, json!({ "delegatePublicKey": delegate() })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "success": false, "error": "Invalid signature" }));
    assert!(harness.destination.submissions().is_empty());
}

#[tokio::test]
async fn vote_and_unvote_are_signed_by_custodial_wallet() {
    let harness = setup().await;
    let buyer = address_of(BUYER_KEY);
    let binding = harness
        .storage
        .binding_for(&buyer.to_string())
        .await
        .unwrap()
        .unwrap();

    let (status, body) = post(
        &harness.app,
        "/api/voting/vote",
        &signed_body(BUYER_KEY, buyer, json!({ "delegatePublicKey": delegate() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let tx_id = body["transactionId"].as_str().unwrap().to_string();

    let (status, _) = post(
        &harness.app,
        "/api/voting/unvote",
        &signed_body(BUYER_KEY, buyer, json!({ "delegatePublicKey": delegate() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let submissions = harness.destination.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].tx_id, tx_id);
    assert_eq!(submissions[0].signer_address, binding.destination_address);
    assert_eq!(submissions[0].kind, SubmissionKind::Vote(format!("+{}", delegate())));
    assert_eq!(submissions[1].kind, SubmissionKind::Vote(format!("-{}", delegate())));
}

#[tokio::test]
async fn vote_requires_delegate_key() {
    let harness = setup().await;
    let buyer = address_of(BUYER_KEY);

    let (status, body) = post(
        &harness.app,
        "/api/voting/vote",
        &signed_body(BUYER_KEY, buyer, json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn unbound_address_is_not_found() {
    let harness = setup().await;
    let stranger = address_of(STRANGER_KEY);

    let (status, body) = post(
        &harness.app,
        "/api/voting/status",
        &signed_body(STRANGER_KEY, stranger, json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn status_reports_balance_and_votes() {
    let harness = setup().await;
    let buyer = address_of(BUYER_KEY);
    let binding = harness
        .storage
        .binding_for(&buyer.to_string())
        .await
        .unwrap()
        .unwrap();
    harness
        .destination
        .set_balance(&binding.destination_address, 100_000_000);
    harness.destination.set_votes(
        &binding.destination_address,
        vec![DelegateVote {
            delegate_address: "hmGenesisDelegate".to_string(),
            delegate_public_key: delegate(),
            name: "genesis_3".to_string(),
            weight: 250_000_000_000,
        }],
    );

    let (status, body) = post(
        &harness.app,
        "/api/voting/status",
        &signed_body(BUYER_KEY, buyer, json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["destinationAddress"], binding.destination_address);
    assert_eq!(body["balance"], 100_000_000);
    assert_eq!(
        body["currentVotes"],
        json!([{
            "delegateAddress": "hmGenesisDelegate",
            "delegatePublicKey": delegate(),
            "name": "genesis_3",
            "weight": 250_000_000_000u64,
        }])
    );
}

#[tokio::test]
async fn destination_outage_maps_to_bad_gateway() {
    let harness = setup().await;
    let buyer = address_of(BUYER_KEY);
    harness.destination.set_unavailable(true);

    let (status, body) = post(
        &harness.app,
        "/api/voting/vote",
        &signed_body(BUYER_KEY, buyer, json!({ "delegatePublicKey": delegate() })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
}
