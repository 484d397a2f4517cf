//! In-memory stand-in for the Alma users API.
//!
//! Serves `/almaws/v1/users/{id}` and the loans, requests and fees below it
//! from a seeded store. Requests must carry `Authorization: apikey {key}` and
//! `format=json`; failures use Alma's JSON error envelope. Empty collections
//! omit their array field the way Alma does.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::trace::TraceLayer;

pub const API_ROOT: &str = "/almaws/v1";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub primary_id: String,
    pub first_name: String,
    pub last_name: String,
    pub user_group: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub loan_id: String,
    pub title: String,
    pub due_date: String,
    pub loan_status: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRequest {
    pub request_id: String,
    pub title: String,
    pub request_type: String,
    pub request_status: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub id: String,
    #[serde(rename = "type")]
    pub fee_type: String,
    pub balance: f64,
    pub status: String,
}

/// A user together with everything hanging off it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Patron {
    pub user: User,
    #[serde(default)]
    pub loans: Vec<Loan>,
    #[serde(default)]
    pub requests: Vec<UserRequest>,
    #[serde(default)]
    pub fees: Vec<Fee>,
}

pub type Db = Arc<RwLock<HashMap<String, Patron>>>;

#[derive(Clone)]
pub struct AppState {
    pub api_key: Arc<str>,
    pub db: Db,
}

impl AppState {
    pub fn new(api_key: &str, db: Db) -> Self {
        Self {
            api_key: Arc::from(api_key),
            db,
        }
    }
}

/// Two patrons: `U1` with loans, a request and a fee; `U2` with nothing.
pub fn sample_db() -> Db {
    let u1 = Patron {
        user: User {
            primary_id: "U1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            user_group: "STAFF".to_string(),
        },
        loans: vec![
            Loan {
                loan_id: "L1".to_string(),
                title: "Sketch of the Analytical Engine".to_string(),
                due_date: "2026-11-01T23:59:00Z".to_string(),
                loan_status: "ACTIVE".to_string(),
            },
            Loan {
                loan_id: "L2".to_string(),
                title: "Notes on the Difference Engine".to_string(),
                due_date: "2026-11-08T23:59:00Z".to_string(),
                loan_status: "ACTIVE".to_string(),
            },
        ],
        requests: vec![UserRequest {
            request_id: "R1".to_string(),
            title: "Principia Mathematica".to_string(),
            request_type: "HOLD".to_string(),
            request_status: "NOT_STARTED".to_string(),
        }],
        fees: vec![Fee {
            id: "F1".to_string(),
            fee_type: "OVERDUEFINE".to_string(),
            balance: 2.5,
            status: "ACTIVE".to_string(),
        }],
    };
    let u2 = Patron {
        user: User {
            primary_id: "U2".to_string(),
            first_name: "Charles".to_string(),
            last_name: "Babbage".to_string(),
            user_group: "PATRON".to_string(),
        },
        loans: Vec::new(),
        requests: Vec::new(),
        fees: Vec::new(),
    };

    let patrons = [u1, u2]
        .into_iter()
        .map(|p| (p.user.primary_id.clone(), p))
        .collect();
    Arc::new(RwLock::new(patrons))
}

pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/users/{user_id}", get(get_user))
        .route("/users/{user_id}/loans", get(list_loans))
        .route("/users/{user_id}/loans/{loan_id}", get(get_loan))
        .route("/users/{user_id}/requests", get(list_requests))
        .route("/users/{user_id}/requests/{request_id}", get(get_request))
        .route("/users/{user_id}/fees", get(list_fees))
        .route("/users/{user_id}/fees/{fee_id}", get(get_fee))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state);

    Router::new()
        .nest(API_ROOT, api)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

/// Alma's error envelope.
pub fn alma_error(status: StatusCode, code: &str, message: &str) -> Response {
    let body = json!({
        "errorsExist": true,
        "errorList": {
            "error": [{ "errorCode": code, "errorMessage": message, "trackingId": "mock" }]
        },
        "result": null
    });
    (status, Json(body)).into_response()
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let expected = format!("apikey {}", state.api_key);
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if provided != Some(expected.as_str()) {
        return alma_error(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "API-key not defined or not configured to allow this API.",
        );
    }

    let wants_json = request
        .uri()
        .query()
        .is_some_and(|q| q.split('&').any(|pair| pair == "format=json"));
    if !wants_json {
        return alma_error(
            StatusCode::BAD_REQUEST,
            "FORMAT",
            "This server only answers format=json requests.",
        );
    }

    next.run(request).await
}

fn patron(db: &HashMap<String, Patron>, user_id: &str) -> Result<Patron, Response> {
    db.get(user_id).cloned().ok_or_else(|| {
        alma_error(
            StatusCode::BAD_REQUEST,
            "401861",
            &format!("User with identifier {user_id} was not found."),
        )
    })
}

/// Alma list shape: `{ field: [...], total_record_count }`, field omitted
/// when empty.
fn collection<T: Serialize>(field: &str, items: &[T]) -> Value {
    let mut body = json!({ "total_record_count": items.len() });
    if !items.is_empty() {
        body[field] = json!(items);
    }
    body
}

fn not_found(kind: &str, id: &str) -> Response {
    alma_error(
        StatusCode::BAD_REQUEST,
        "401890",
        &format!("{kind} with identifier {id} was not found."),
    )
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<User>, Response> {
    let db = state.db.read().await;
    Ok(Json(patron(&db, &user_id)?.user))
}

async fn list_loans(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, Response> {
    let db = state.db.read().await;
    Ok(Json(collection("item_loan", &patron(&db, &user_id)?.loans)))
}

async fn get_loan(
    State(state): State<AppState>,
    Path((user_id, loan_id)): Path<(String, String)>,
) -> Result<Json<Loan>, Response> {
    let db = state.db.read().await;
    patron(&db, &user_id)?
        .loans
        .into_iter()
        .find(|l| l.loan_id == loan_id)
        .map(Json)
        .ok_or_else(|| not_found("Loan", &loan_id))
}

async fn list_requests(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, Response> {
    let db = state.db.read().await;
    Ok(Json(collection("user_request", &patron(&db, &user_id)?.requests)))
}

async fn get_request(
    State(state): State<AppState>,
    Path((user_id, request_id)): Path<(String, String)>,
) -> Result<Json<UserRequest>, Response> {
    let db = state.db.read().await;
    patron(&db, &user_id)?
        .requests
        .into_iter()
        .find(|r| r.request_id == request_id)
        .map(Json)
        .ok_or_else(|| not_found("Request", &request_id))
}

async fn list_fees(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, Response> {
    let db = state.db.read().await;
    let fees = patron(&db, &user_id)?.fees;
    let mut body = collection("fee", &fees);
    body["total_sum"] = json!(fees.iter().map(|f| f.balance).sum::<f64>());
    Ok(Json(body))
}

async fn get_fee(
    State(state): State<AppState>,
    Path((user_id, fee_id)): Path<(String, String)>,
) -> Result<Json<Fee>, Response> {
    let db = state.db.read().await;
    patron(&db, &user_id)?
        .fees
        .into_iter()
        .find(|f| f.id == fee_id)
        .map(Json)
        .ok_or_else(|| not_found("Fee", &fee_id))
}
