use axum::http::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;
use tokenfund::api;
use tokenfund::config::Config;
use tokenfund::db::init_db;
use tokenfund::domain::{Address, Decimal, IssuedAsset, PurchaseStatus};
use tokenfund::ledger::{AmmPool, LedgerGateway, MockLedger};
use tokenfund::orchestration::{DepositMatcher, ReconcileSettings};
use tokenfund::Repository;
use tower::util::ServiceExt;

const ISSUER: &str = "rTokenIssuer11111111111111111";
const HOT: &str = "rHotWallet1111111111111111111";
const DEPOSIT: &str = "rDepositWallet111111111111111";
const USDC_ISSUER: &str = "rUsdcIssuer111111111111111111";
const ALICE: &str = "rAlice1111111111111111111111";

struct TestApp {
    app: axum::Router,
    repo: Arc<Repository>,
    ledger: MockLedger,
    config: Config,
    _temp: TempDir,
}

fn token() -> IssuedAsset {
    IssuedAsset::new("IND", Address::new(ISSUER.to_string()))
}

fn alice() -> Address {
    Address::from_str(ALICE).unwrap()
}

async fn setup_test_app(ledger: MockLedger) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let env: HashMap<String, String> = [
        ("DATABASE_PATH", db_path.as_str()),
        ("TOKEN_ISSUER_ADDRESS", ISSUER),
        ("COLD_WALLET_SEED", "sCold"),
        ("HOT_WALLET_ADDRESS", HOT),
        ("HOT_WALLET_SEED", "sHot"),
        ("DEPOSIT_WALLET_ADDRESS", DEPOSIT),
        ("DEPOSIT_WALLET_SEED", "sDeposit"),
        ("USDC_ISSUER_ADDRESS", USDC_ISSUER),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let config = Config::from_env_map(env).expect("test config");

    let gateway: Arc<dyn LedgerGateway> = Arc::new(ledger.clone());
    let state = api::AppState::new(repo.clone(), gateway, config.clone());
    let app = api::create_router(state);

    TestApp {
        app,
        repo,
        ledger,
        config,
        _temp: temp_dir,
    }
}

async fn request(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = axum::http::Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Onboard Alice and return her investor id.
async fn onboard_alice(app: &TestApp) -> String {
    let (status, body) = request(
        &app.app,
        "POST",
        "/api/onboard",
        Some(json!({"email": "Alice@Fund.io", "xrplAddress": ALICE})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

/// Onboard, approve and authorize Alice.
async fn ready_alice(app: &TestApp) -> String {
    let id = onboard_alice(app).await;
    let (status, _) = request(&app.app, "POST", "/api/kyc/approve", Some(json!({"investorId": id}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = request(
        &app.app,
        "POST",
        "/api/trustline/confirm",
        Some(json!({"investorId": id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    id
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = setup_test_app(MockLedger::new()).await;
    let (status, body) = request(&app.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = request(&app.app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_onboard_validates_and_rejects_duplicates() {
    let app = setup_test_app(MockLedger::new()).await;

    let (status, body) = request(
        &app.app,
        "POST",
        "/api/onboard",
        Some(json!({"email": "bob@fund.io", "xrplAddress": "xNotAnAddress1111111111111111"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid XRPL address"));

    let (status, _) = request(
        &app.app,
        "POST",
        "/api/onboard",
        Some(json!({"email": "not-an-email", "xrplAddress": ALICE})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let id = onboard_alice(&app).await;
    let (status, body) = request(&app.app, "GET", &format!("/api/investor/{}", ALICE), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["email"], "alice@fund.io");
    assert_eq!(body["kycApproved"], false);

    let (status, _) = request(
        &app.app,
        "POST",
        "/api/onboard",
        Some(json!({"email": "alice@fund.io", "xrplAddress": ALICE})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trust_line_confirmation_gates() {
    let app = setup_test_app(MockLedger::new()).await;
    let id = onboard_alice(&app).await;

    let (status, _) = request(
        &app.app,
        "POST",
        "/api/trustline/confirm",
        Some(json!({"investorId": id})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    request(&app.app, "POST", "/api/kyc/approve", Some(json!({"investorId": id}))).await;
    let (status, body) = request(
        &app.app,
        "POST",
        "/api/trustline/confirm",
        Some(json!({"investorId": id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("trust line"));

    app.ledger.set_trust_line(&alice(), &token(), Decimal::zero(), false);
    let (status, body) = request(
        &app.app,
        "POST",
        "/api/trustline/confirm",
        Some(json!({"investorId": id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["investor"]["trustLineCreated"], true);
    assert!(body["authorizationTxId"].as_str().is_some());
    assert!(app.ledger.has_authorized_trust_line(&alice(), &token()).await.unwrap());

    let (status, _) = request(
        &app.app,
        "POST",
        "/api/kyc/approve",
        Some(json!({"investorId": "missing"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_purchase_flow_through_settlement() {
    let ledger = MockLedger::new();
    let app = setup_test_app(ledger).await;
    app.ledger.set_trust_line(&alice(), &token(), Decimal::zero(), false);
    let id = ready_alice(&app).await;

    let (status, body) = request(
        &app.app,
        "POST",
        "/api/buy/initiate",
        Some(json!({"investorId": id, "usdcAmount": "100"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["depositAddress"], DEPOSIT);
    assert_eq!(body["expectedTokens"], "100");
    assert_eq!(body["usdcIssuer"], USDC_ISSUER);
    let purchase_id = body["purchaseId"].as_str().unwrap().to_string();
    let tag = body["destinationTag"].as_u64().unwrap() as u32;

    let (status, body) = request(&app.app, "GET", &format!("/api/buy/status/{}", purchase_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    // The investor pays; the monitor's matcher picks it up.
    let matcher = DepositMatcher::new(
        app.repo.clone(),
        Arc::new(app.ledger.clone()),
        ReconcileSettings::from_config(&app.config),
    );
    let usdc = app.config.usdc_asset().unwrap();
    let event = MockLedger::validated_payment(
        "ALICEPAY",
        &alice(),
        &app.config.deposit_wallet_address,
        usdc.amount(Decimal::from(100u64)),
        Some(tokenfund::DestinationTag::new(tag)),
    )
    .to_observed_payment()
    .unwrap();
    matcher.process(&event).await;

    let (_, body) = request(&app.app, "GET", &format!("/api/buy/status/{}", purchase_id), None).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["depositTxId"], "ALICEPAY");
    assert_eq!(body["tokenAmount"], "100");
    let stored = app.repo.get_purchase(&purchase_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PurchaseStatus::Completed);

    // Mock trust line balance stays zero, so the dashboard falls back to records.
    let (status, body) = request(&app.app, "GET", &format!("/api/dashboard/{}", ALICE), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tokenBalance"], "100");
    assert_eq!(body["balanceSource"], "records");
    assert_eq!(body["estimatedValueUsd"], "100");

    let (_, body) = request(&app.app, "GET", "/api/stats", None).await;
    assert_eq!(body["totalInvestors"], 1);
    assert_eq!(body["totalRaised"], "100");
    assert_eq!(body["totalTokensIssued"], "100");
    assert_eq!(body["ipoPhase"], "active");
}

#[tokio::test]
async fn test_purchase_gates() {
    let app = setup_test_app(MockLedger::new()).await;
    let id = onboard_alice(&app).await;

    let (status, _) = request(
        &app.app,
        "POST",
        "/api/buy/initiate",
        Some(json!({"investorId": id, "usdcAmount": "10"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    request(&app.app, "POST", "/api/kyc/approve", Some(json!({"investorId": id}))).await;
    let (status, _) = request(
        &app.app,
        "POST",
        "/api/buy/initiate",
        Some(json!({"investorId": id, "usdcAmount": "10"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.repo.mark_trust_line_created(&id).await.unwrap();
    let (status, _) = request(
        &app.app,
        "POST",
        "/api/buy/initiate",
        Some(json!({"investorId": id, "usdcAmount": "0"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(
        &app.app,
        "PUT",
        "/api/admin/config",
        Some(json!({"key": "ipo_phase", "value": "closed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "closed");
    let (status, _) = request(
        &app.app,
        "POST",
        "/api/buy/initiate",
        Some(json!({"investorId": id, "usdcAmount": "10"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &app.app,
        "PUT",
        "/api/admin/config",
        Some(json!({"key": "ipo_phase", "value": "maybe"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(&app.app, "GET", "/api/buy/status/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_nav_defaults_and_records() {
    let app = setup_test_app(MockLedger::new()).await;

    let (status, body) = request(&app.app, "GET", "/api/nav", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["navPerToken"], "1");
    assert!(body.get("latest").is_none());

    let (status, body) = request(
        &app.app,
        "POST",
        "/api/admin/nav",
        Some(json!({"totalFundValue": "1050", "totalTokensOutstanding": "1000"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["navPerToken"], "1.05");

    let (_, body) = request(&app.app, "GET", "/api/nav?history=5", None).await;
    assert_eq!(body["navPerToken"], "1.05");
    assert_eq!(body["history"].as_array().unwrap().len(), 1);

    let (status, _) = request(
        &app.app,
        "POST",
        "/api/admin/nav",
        Some(json!({"totalFundValue": "1", "totalTokensOutstanding": "0"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pool_info_and_quote() {
    let ledger = MockLedger::new().with_amm_pool(AmmPool {
        account: Address::new("rAmmPool".to_string()),
        token_reserve: Decimal::from(1000u64),
        native_reserve: Decimal::from(1000u64),
        trading_fee: 500,
    });
    let app = setup_test_app(ledger).await;

    let (status, body) = request(&app.app, "GET", "/api/pool/info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);
    let (status, _) = request(&app.app, "GET", "/api/pool/quote?direction=buy&amount=10", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.repo.set_config_value("pool_created", "true").await.unwrap();
    let (_, body) = request(&app.app, "GET", "/api/pool/info", None).await;
    assert_eq!(body["created"], true);
    assert_eq!(body["pool"]["priceXrpPerToken"], "1");
    assert_eq!(body["pool"]["tradingFeePercent"], "0.5");

    let (status, body) = request(&app.app, "GET", "/api/pool/quote?direction=sell&amount=10", None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["direction"], "sell");
    // 10 * 0.995 * 1000 / (1000 + 9.95)
    assert_eq!(body["estimatedOut"], "9.85197286994406");

    let (status, _) = request(&app.app, "GET", "/api/pool/quote?direction=buy&amount=-1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(
        &app.app,
        "GET",
        "/api/pool/quote?direction=buy&amount=79228162514264337593543950335",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
}

#[tokio::test]
async fn test_redemption_queue_and_settlement() {
    let app = setup_test_app(MockLedger::new()).await;
    app.ledger
        .set_trust_line(&alice(), &token(), Decimal::from(50u64), true);
    let id = ready_alice(&app).await;

    let (status, _) = request(
        &app.app,
        "POST",
        "/api/redeem",
        Some(json!({"investorId": id, "tokenAmount": "60"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(
        &app.app,
        "POST",
        "/api/redeem",
        Some(json!({"investorId": id, "tokenAmount": "20"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "queued");
    let redemption_id = body["id"].as_str().unwrap().to_string();

    // 50 held, 20 queued: only 30 left to redeem.
    let (status, _) = request(
        &app.app,
        "POST",
        "/api/redeem",
        Some(json!({"investorId": id, "tokenAmount": "31"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = request(&app.app, "GET", &format!("/api/dashboard/{}", ALICE), None).await;
    assert_eq!(body["balanceSource"], "ledger");
    assert_eq!(body["pendingRedemptions"].as_array().unwrap().len(), 1);

    let (status, body) = request(
        &app.app,
        "POST",
        "/api/admin/redemptions/settle",
        Some(json!({"navPrice": "1.1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["completed"], json!([redemption_id.clone()]));
    assert_eq!(body["usdcPaid"], "22");
    assert_eq!(body["unrecorded"], json!([]));

    let (_, body) = request(&app.app, "GET", &format!("/api/redeem/status/{}", redemption_id), None).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["navPrice"], "1.1");
    assert_eq!(body["usdcAmount"], "22");
    assert!(body["redemptionTxId"].as_str().is_some());
}

#[tokio::test]
async fn test_incomplete_purchases_lists_failed_settlements() {
    let app = setup_test_app(MockLedger::new()).await;
    let id = onboard_alice(&app).await;
    app.repo.approve_kyc(&id).await.unwrap();
    app.repo.mark_trust_line_created(&id).await.unwrap();
    let purchase = app.repo.create_purchase(&id, Decimal::from(5u64)).await.unwrap();
    app.repo.claim_deposit(&purchase.id, "STUCK").await.unwrap();
    app.repo.create_purchase(&id, Decimal::from(6u64)).await.unwrap();

    let (status, body) = request(&app.app, "GET", "/api/admin/purchases/incomplete", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["purchases"][0]["id"], purchase.id.as_str());
    assert_eq!(body["purchases"][0]["status"], "forwarded");
}
