use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use form_core::{ContractBackend, ReferenceDataProvider};
use shared::{
    domain::{
        CommodityId, ContractId, ContractStatus, ContractType, CounterpartyId, Currency,
        PaymentTerms, TraderId, Unit,
    },
    error::{ApiError, ErrorCode},
    protocol::{Commodity, Contract, ContractPayload, Counterparty, Trader},
};
use tokio::{net::TcpListener, sync::Mutex};

use crate::ContractApiClient;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn sample_payload() -> ContractPayload {
    ContractPayload {
        title: "Q3 Wheat Purchase".to_string(),
        description: "Hard red winter wheat".to_string(),
        contract_type: ContractType::Purchase,
        commodity_id: CommodityId(7),
        counterparty_id: CounterpartyId(3),
        trader_id: TraderId(12),
        quantity: 500.0,
        unit: Unit::Mt,
        price_per_unit: 245.50,
        total_value: 500.0 * 245.50,
        currency: Currency::Usd,
        payment_terms: PaymentTerms::Net30,
        special_terms: String::new(),
        start_date: date(2026, 7, 1),
        end_date: date(2026, 9, 30),
        delivery_date: date(2026, 8, 15),
        delivery_location: "New Orleans, LA".to_string(),
        delivery_terms: String::new(),
        delivery_instructions: String::new(),
        status: ContractStatus::Draft,
    }
}

fn contract_from_payload(id: i64, payload: &ContractPayload) -> Contract {
    Contract {
        id: ContractId(id),
        contract_number: format!("CTR-2026-{id:04}"),
        title: payload.title.clone(),
        description: payload.description.clone(),
        contract_type: payload.contract_type,
        commodity_id: payload.commodity_id,
        counterparty_id: payload.counterparty_id,
        trader_id: payload.trader_id,
        quantity: payload.quantity,
        unit: payload.unit,
        price_per_unit: payload.price_per_unit,
        total_value: payload.total_value,
        currency: payload.currency,
        payment_terms: payload.payment_terms,
        special_terms: payload.special_terms.clone(),
        start_date: payload.start_date,
        end_date: payload.end_date,
        delivery_date: payload.delivery_date,
        delivery_location: payload.delivery_location.clone(),
        delivery_terms: payload.delivery_terms.clone(),
        delivery_instructions: payload.delivery_instructions.clone(),
        status: payload.status,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[derive(Clone, Default)]
struct ServerState {
    created: Arc<Mutex<Vec<ContractPayload>>>,
    updated: Arc<Mutex<Vec<(i64, ContractPayload)>>>,
}

async fn handle_commodities() -> Json<Vec<Commodity>> {
    Json(vec![Commodity {
        id: CommodityId(7),
        name: "Wheat".to_string(),
        category: "Grain".to_string(),
        default_unit: Unit::Mt,
    }])
}

async fn handle_counterparties() -> Json<Vec<Counterparty>> {
    Json(vec![Counterparty {
        id: CounterpartyId(3),
        name: "AgriCorp".to_string(),
        email: "desk@agricorp.example".to_string(),
    }])
}

async fn handle_traders() -> Json<Vec<Trader>> {
    Json(vec![Trader {
        id: TraderId(12),
        name: "Dana Reyes".to_string(),
        email: "dana@example.com".to_string(),
    }])
}

async fn handle_create(
    State(state): State<ServerState>,
    Json(payload): Json<ContractPayload>,
) -> impl IntoResponse {
    let contract = contract_from_payload(101, &payload);
    state.created.lock().await.push(payload);
    (StatusCode::CREATED, Json(contract))
}

async fn handle_update(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
    Json(payload): Json<ContractPayload>,
) -> Json<Contract> {
    let contract = contract_from_payload(id, &payload);
    state.updated.lock().await.push((id, payload));
    Json(contract)
}

async fn handle_get(Path(id): Path<i64>) -> Result<Json<Contract>, (StatusCode, Json<ApiError>)> {
    if id == 42 {
        Ok(Json(contract_from_payload(42, &sample_payload())))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(ApiError::new(ErrorCode::NotFound, "contract not found")),
        ))
    }
}

async fn handle_rejecting_create() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ApiError::new(
            ErrorCode::Validation,
            "counterparty is suspended",
        )),
    )
}

async fn handle_plaintext_failure() -> (StatusCode, String) {
    (StatusCode::BAD_GATEWAY, "upstream timeout".to_string())
}

async fn spawn_server(app: Router) -> Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

async fn spawn_backend() -> Result<(String, ServerState)> {
    let state = ServerState::default();
    let app = Router::new()
        .route("/api/commodities/", get(handle_commodities))
        .route("/api/counterparties/", get(handle_counterparties))
        .route("/api/traders/", get(handle_traders))
        .route("/api/contracts/", post(handle_create))
        .route("/api/contracts/:id/", put(handle_update).get(handle_get))
        .with_state(state.clone());
    let url = spawn_server(app).await?;
    Ok((url, state))
}

#[tokio::test]
async fn fetches_all_three_reference_lists() {
    let (url, _state) = spawn_backend().await.expect("spawn server");
    let client = ContractApiClient::new(url);

    let commodities = client.commodities().await.unwrap();
    assert_eq!(commodities.len(), 1);
    assert_eq!(commodities[0].name, "Wheat");
    assert_eq!(commodities[0].default_unit, Unit::Mt);

    assert_eq!(client.counterparties().await.unwrap().len(), 1);
    assert_eq!(client.traders().await.unwrap()[0].name, "Dana Reyes");
}

#[tokio::test]
async fn create_posts_the_payload_and_returns_the_contract() {
    let (url, state) = spawn_backend().await.expect("spawn server");
    let client = ContractApiClient::new(url);

    let contract = client.create_contract(sample_payload()).await.unwrap();
    assert_eq!(contract.id, ContractId(101));
    assert_eq!(contract.contract_number, "CTR-2026-0101");

    let created = state.created.lock().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].status, ContractStatus::Draft);
    assert_eq!(created[0].total_value, 500.0 * 245.50);
}

#[tokio::test]
async fn update_puts_to_the_contract_resource() {
    let (url, state) = spawn_backend().await.expect("spawn server");
    let client = ContractApiClient::new(url);

    let contract = client
        .update_contract(ContractId(42), sample_payload())
        .await
        .unwrap();
    assert_eq!(contract.id, ContractId(42));

    let updated = state.updated.lock().await;
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].0, 42);
}

#[tokio::test]
async fn get_round_trips_an_existing_contract() {
    let (url, _state) = spawn_backend().await.expect("spawn server");
    let client = ContractApiClient::new(url);

    let contract = client.get_contract(ContractId(42)).await.unwrap();
    assert_eq!(contract.title, "Q3 Wheat Purchase");
}

#[tokio::test]
async fn structured_error_bodies_come_back_verbatim() {
    let (url, _state) = spawn_backend().await.expect("spawn server");
    let client = ContractApiClient::new(url);

    let err = client.get_contract(ContractId(9)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(err.message, "contract not found");
}

#[tokio::test]
async fn validation_rejections_surface_the_backend_message() {
    let app = Router::new().route("/api/contracts/", post(handle_rejecting_create));
    let url = spawn_server(app).await.expect("spawn server");
    let client = ContractApiClient::new(url);

    let err = client.create_contract(sample_payload()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(err.message, "counterparty is suspended");
}

#[tokio::test]
async fn unstructured_failures_still_produce_a_message() {
    let app = Router::new().route("/api/contracts/", post(handle_plaintext_failure));
    let url = spawn_server(app).await.expect("spawn server");
    let client = ContractApiClient::new(url);

    let err = client.create_contract(sample_payload()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
    assert_eq!(err.message, "upstream timeout");
}

#[tokio::test]
async fn unreachable_backends_report_a_transport_error() {
    let client = ContractApiClient::new("http://127.0.0.1:1");
    let err = client.create_contract(sample_payload()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
    assert!(err.message.contains("unreachable"));
}

#[tokio::test]
async fn trailing_slashes_in_the_base_url_are_tolerated() {
    let (url, _state) = spawn_backend().await.expect("spawn server");
    let client = ContractApiClient::new(format!("{url}/"));
    assert!(!client.base_url().ends_with('/'));
    assert_eq!(client.commodities().await.unwrap().len(), 1);
}
