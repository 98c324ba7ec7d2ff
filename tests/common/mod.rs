//! In-process stand-in for the marketplace backend the scenarios target.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::patch;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
struct User {
    id: String,
    email: String,
    #[serde(skip)]
    password: String,
}

#[derive(Debug, Clone, Serialize)]
struct Item {
    id: String,
    #[serde(rename = "ownerID")]
    owner_id: String,
    name: String,
    category: i64,
    description: Option<String>,
}

#[derive(Default)]
struct Store {
    users: Vec<User>,
    items: Vec<Item>,
}

type Shared = Arc<Mutex<Store>>;

#[derive(Deserialize)]
struct Credentials {
    #[serde(alias = "Email")]
    email: String,
    #[serde(alias = "Password")]
    password: String,
}

#[derive(Deserialize)]
struct CreateItem {
    #[serde(rename = "OwnerID")]
    owner_id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Category")]
    category: i64,
    #[serde(rename = "Description")]
    description: Option<String>,
}

#[derive(Deserialize)]
struct UpdateItem {
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Category")]
    category: i64,
    #[serde(rename = "Description")]
    description: Option<String>,
}

#[derive(Deserialize)]
struct CreateTrade {
    initiator: String,
    receiver: String,
    #[serde(rename = "OfferingItems")]
    offering: Vec<String>,
    #[serde(rename = "SeekingItems")]
    seeking: Vec<String>,
}

fn data(value: impl Serialize) -> Json<Value> {
    Json(json!({ "data": value }))
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn sign_up(State(store): State<Shared>, Json(body): Json<Credentials>) -> Response {
    let mut store = store.lock().unwrap();
    if store.users.iter().any(|user| user.email == body.email) {
        return error(StatusCode::BAD_REQUEST, "email already registered");
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        email: body.email,
        password: body.password,
    };
    store.users.push(user.clone());
    data(user).into_response()
}

async fn sign_in(State(store): State<Shared>, Json(body): Json<Credentials>) -> Response {
    let store = store.lock().unwrap();
    match store
        .users
        .iter()
        .find(|user| user.email == body.email && user.password == body.password)
    {
        Some(user) => Json(json!({ "token": format!("token-{}", user.id) })).into_response(),
        None => error(StatusCode::UNAUTHORIZED, "bad credentials"),
    }
}

async fn user_by_email(State(store): State<Shared>, Path(email): Path<String>) -> Response {
    let store = store.lock().unwrap();
    match store.users.iter().find(|user| user.email == email) {
        Some(user) => data(user).into_response(),
        None => error(StatusCode::NOT_FOUND, "no such user"),
    }
}

async fn user_by_id(State(store): State<Shared>, Path(id): Path<String>) -> Response {
    let store = store.lock().unwrap();
    match store.users.iter().find(|user| user.id == id) {
        Some(user) => data(user).into_response(),
        None => error(StatusCode::NOT_FOUND, "no such user"),
    }
}

async fn dump_users(State(store): State<Shared>) -> Json<Value> {
    data(&store.lock().unwrap().users)
}

async fn create_item(State(store): State<Shared>, Json(body): Json<CreateItem>) -> Response {
    let mut store = store.lock().unwrap();
    if !store.users.iter().any(|user| user.id == body.owner_id) {
        return error(StatusCode::NOT_FOUND, "no such owner");
    }

    let item = Item {
        id: Uuid::new_v4().to_string(),
        owner_id: body.owner_id,
        name: body.name,
        category: body.category,
        description: body.description,
    };
    store.items.push(item.clone());
    data(item).into_response()
}

async fn items_by_owner(State(store): State<Shared>, Path(owner): Path<String>) -> Json<Value> {
    let store = store.lock().unwrap();
    let items: Vec<&Item> = store.items.iter().filter(|item| item.owner_id == owner).collect();
    data(items)
}

async fn item_by_id(State(store): State<Shared>, Path(id): Path<String>) -> Response {
    let store = store.lock().unwrap();
    match store.items.iter().find(|item| item.id == id) {
        Some(item) => data(item).into_response(),
        None => error(StatusCode::NOT_FOUND, "no such item"),
    }
}

async fn update_item(
    State(store): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<UpdateItem>,
) -> Response {
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("Bearer token-"));
    if !authorized {
        return error(StatusCode::UNAUTHORIZED, "missing token");
    }

    let mut store = store.lock().unwrap();
    match store.items.iter_mut().find(|item| item.id == body.id) {
        Some(item) => {
            item.name = body.name;
            item.category = body.category;
            item.description = body.description;
            data(item.clone()).into_response()
        }
        None => error(StatusCode::NOT_FOUND, "no such item"),
    }
}

async fn create_trade(State(store): State<Shared>, Json(body): Json<CreateTrade>) -> Response {
    let store = store.lock().unwrap();
    let known = |id: &str| store.users.iter().any(|user| user.id == id);
    if !known(&body.initiator) || !known(&body.receiver) {
        return error(StatusCode::NOT_FOUND, "no such user");
    }

    let owner_of = |id: &str| {
        store
            .items
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.owner_id.clone())
    };
    let offering_ok = body
        .offering
        .iter()
        .all(|id| owner_of(id).as_deref() == Some(body.initiator.as_str()));
    let seeking_ok = body
        .seeking
        .iter()
        .all(|id| owner_of(id).as_deref() == Some(body.receiver.as_str()));
    if !offering_ok || !seeking_ok {
        return error(StatusCode::BAD_REQUEST, "invalid trade");
    }

    data(json!({ "id": Uuid::new_v4().to_string() })).into_response()
}

async fn echo(Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "query": query,
        "x-trace": header("x-trace"),
        "accept": header("accept"),
    }))
}

async fn status(Path(code): Path<u16>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "code": code }))).into_response()
}

async fn plain() -> &'static str {
    "ok"
}

async fn broken_json() -> Response {
    ([(CONTENT_TYPE, "application/json")], "{not json").into_response()
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(2)).await;
    "late"
}

pub fn router() -> Router {
    Router::new()
        .route("/authentication/sign/up", post(sign_up))
        .route("/authentication/sign/in", post(sign_in))
        .route("/get/user/by/email/{email}", get(user_by_email))
        .route("/get/user/by/id/{id}", get(user_by_id))
        .route("/debug/dump/users", get(dump_users))
        .route("/create/item", post(create_item))
        .route("/get/items/by/owner/{id}", get(items_by_owner))
        .route("/get/item/by/id/{id}", get(item_by_id))
        .route("/update/item", patch(update_item))
        .route("/create/trade", post(create_trade))
        .route("/echo", get(echo))
        .route("/status/{code}", get(status))
        .route("/plain", get(plain))
        .route("/broken-json", get(broken_json))
        .route("/slow", get(slow))
        .with_state(Shared::default())
}

/// Serves a fresh backend on an ephemeral port and returns its base URL.
pub async fn spawn_backend() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router()).await.unwrap();
    });

    format!("http://{addr}")
}
