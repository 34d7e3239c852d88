use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use telecall::registry::RegistryError;
use telecall::{CallRegistry, HttpRegistry, Party, Role};
use tokio::net::TcpListener;

const TOKEN: &str = "registry-token";

#[derive(Clone, Default)]
struct Portal {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Portal {
    fn record(&self, headers: &HeaderMap, what: &str, body: Value) -> bool {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {TOKEN}"));
        self.requests.lock().push((what.to_string(), body));
        authorized
    }

    fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().clone()
    }
}

async fn start(State(portal): State<Portal>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !portal.record(&headers, "start", body) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    (StatusCode::CREATED, Json(json!({ "id": 41, "status": "pending" }))).into_response()
}

async fn end(State(portal): State<Portal>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    portal.record(&headers, "end", body);
    Json(json!({ "status": "ended" })).into_response()
}

async fn status(
    State(portal): State<Portal>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    portal.record(&headers, "status", json!(id));
    match id.as_str() {
        "41" => Json(json!({ "isConnected": true })).into_response(),
        "99" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn available(State(portal): State<Portal>, headers: HeaderMap) -> Response {
    portal.record(&headers, "available", Value::Null);
    Json(json!([
        { "id": 3, "username": "house", "first_name": "Gregory", "last_name": "House", "role": "doctor" },
        { "id": 9, "username": "pat", "first_name": "", "last_name": "", "role": "patient" },
        { "id": 1, "username": "admin", "first_name": "", "last_name": "" }
    ]))
    .into_response()
}

async fn serve() -> (Portal, String) {
    let portal = Portal::default();
    let app = Router::new()
        .route("/api/call/start/", post(start))
        .route("/api/call/end/", post(end))
        .route("/api/call/:id/status/", get(status))
        .route("/api/available-users/", get(available))
        .with_state(portal.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (portal, format!("http://{addr}/api/"))
}

#[tokio::test]
async fn create_orders_doctor_and_patient() {
    let (portal, base) = serve().await;
    let registry = HttpRegistry::new(&base, TOKEN).unwrap();
    let patient = Party::new("9", Role::Patient, "Pat");
    let doctor = Party::new("3", Role::Doctor, "Gregory House");

    let session = registry.create_call_session(&patient, &doctor).await.unwrap();
    assert_eq!(session.id, "41");
    assert_eq!(session.caller, patient.id);
    assert_eq!(session.callee, doctor.id);

    let requests = portal.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].1, json!({ "doctor_id": 3, "patient_id": 9 }));
}

#[tokio::test]
async fn wrong_token_surfaces_the_status() {
    let (_portal, base) = serve().await;
    let registry = HttpRegistry::new(&base, "stale").unwrap();
    let patient = Party::new("9", Role::Patient, "Pat");
    let doctor = Party::new("3", Role::Doctor, "Dr");

    let err = registry
        .create_call_session(&patient, &doctor)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Status { status: 401, .. }));
}

#[tokio::test]
async fn status_of_unknown_session_is_not_connected() {
    let (_portal, base) = serve().await;
    let registry = HttpRegistry::new(&base, TOKEN).unwrap();

    assert!(registry.check_call_status("41").await.unwrap().is_connected);
    assert!(!registry.check_call_status("7").await.unwrap().is_connected);
    assert_eq!(
        registry.check_call_status("99").await,
        Err(RegistryError::Status {
            status: 500,
            body: "boom".into()
        })
    );
}

#[tokio::test]
async fn session_id_from_a_peer_stays_inside_the_status_path() {
    let (portal, base) = serve().await;
    let registry = HttpRegistry::new(&base, TOKEN).unwrap();

    let status = registry
        .check_call_status("41/../../available-users")
        .await
        .unwrap();
    assert!(!status.is_connected);
    assert_eq!(
        portal.requests(),
        vec![("status".to_string(), json!("41/../../available-users"))]
    );
}

#[tokio::test]
async fn directory_maps_names_and_skips_roleless_users() {
    let (_portal, base) = serve().await;
    let registry = HttpRegistry::new(&base, TOKEN).unwrap();

    let parties = registry.list_available_parties().await.unwrap();
    assert_eq!(
        parties,
        vec![
            Party::new("3", Role::Doctor, "Gregory House"),
            Party::new("9", Role::Patient, "pat"),
        ]
    );
}

#[tokio::test]
async fn end_sends_numeric_session_id() {
    let (portal, base) = serve().await;
    let registry = HttpRegistry::new(&base, TOKEN).unwrap();

    registry.end_call_session("41").await.unwrap();
    assert_eq!(
        portal.requests(),
        vec![("end".to_string(), json!({ "session_id": 41 }))]
    );
}

#[tokio::test]
async fn unreachable_registry_is_an_http_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let registry = HttpRegistry::new(&format!("http://{addr}/api"), TOKEN).unwrap();

    let err = registry.check_call_status("41").await.unwrap_err();
    assert!(matches!(err, RegistryError::Http(_)));
}
