use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use deskline_live::dashboard::{AdminSummary, ChartPoint, SummaryCard};
use deskline_live::{Ack, ChatRoom, ChatStatus, Customer, Message, SendOutcome, StartedChat};
use deskline_shared::actor::{Actor, Role};
use deskline_shared::constants::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use deskline_shared::{Collection, Filter, Record, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::views::{Backend, Services};

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    async fn services(&self) -> Result<&Services, ServerError> {
        self.backend.services().await
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        // Customer chat widget
        .route("/widget/chats", post(widget_start_chat))
        .route(
            "/widget/chats/:id/messages",
            get(widget_messages).post(widget_send_message),
        )
        // Chat room management
        .route("/admin/chats", get(admin_chats))
        .route("/admin/chats/:id/status", post(admin_set_status))
        .route(
            "/admin/chats/:id/messages",
            get(admin_messages).post(admin_send_message),
        )
        // Customer management
        .route("/admin/users", get(admin_users).post(admin_create_user))
        .route("/admin/users/:id", put(admin_edit_user).delete(admin_delete_user))
        // Analytics
        .route("/admin/dashboard/cards", get(dashboard_cards))
        .route("/admin/dashboard/chart", get(dashboard_chart))
        .route("/admin/dashboard/top-admins", get(dashboard_top_admins))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    live: bool,
    admins: usize,
}

#[derive(Deserialize)]
struct StartChatRequest {
    name: String,
    email: String,
}

#[derive(Deserialize)]
struct WidgetMessageRequest {
    user_id: String,
    content: String,
}

#[derive(Deserialize)]
struct AdminMessageRequest {
    content: String,
}

#[derive(Deserialize)]
struct StatusRequest {
    status: String,
}

#[derive(Deserialize)]
struct ChatListQuery {
    status: Option<String>,
}

#[derive(Deserialize)]
struct CreateUserRequest {
    name: String,
    email: String,
}

#[derive(Deserialize)]
struct EditUserRequest {
    name: Option<String>,
    email: Option<String>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        live: state.backend.is_ready(),
        admins: state.config.admins.len(),
    })
}

// ─── Actor claims ───

/// Read the actor claims set by the identity provider in front of us.
fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ServerError> {
    let id = headers
        .get(ACTOR_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServerError::Unauthorized(format!("Missing {ACTOR_ID_HEADER} header")))?;
    let role = headers
        .get(ACTOR_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(Role::from_claim)
        .unwrap_or(Role::Customer);
    Ok(Actor {
        id: id.to_string(),
        role,
    })
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Ok(());
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

fn require_admin(headers: &HeaderMap, config: &ServerConfig) -> Result<Actor, ServerError> {
    verify_admin_token(headers, config)?;
    let actor = actor_from_headers(headers)?;
    if !actor.is_admin() {
        return Err(ServerError::Forbidden("Admin role required".into()));
    }
    Ok(actor)
}

fn chat_id(raw: &str) -> Result<RecordId, ServerError> {
    Ok(RecordId::parse_in(Collection::Chat, raw)?)
}

fn customer_id(raw: &str) -> Result<RecordId, ServerError> {
    Ok(RecordId::parse_in(Collection::ChatUser, raw)?)
}

async fn fetch_chat(services: &Services, chat: &RecordId) -> Result<Record, ServerError> {
    let mut rows = services
        .conn
        .select(Collection::Chat, &Filter::eq("id", chat.to_string()), None, Some(1))
        .await
        .map_err(|e| ServerError::Unavailable(e.to_string()))?;
    rows.pop()
        .ok_or_else(|| ServerError::NotFound(chat.to_string()))
}

// ─── Widget ───

async fn widget_start_chat(
    State(state): State<AppState>,
    Json(req): Json<StartChatRequest>,
) -> Result<(StatusCode, Json<StartedChat>), ServerError> {
    let services = state.services().await?;
    let started = services.dispatcher.start_chat(&req.name, &req.email).await?;
    info!(chat = %started.chat.id, "Chat started from widget");
    Ok((StatusCode::CREATED, Json(started)))
}

async fn widget_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let chat = chat_id(&id)?;
    let services = state.services().await?;
    // Unknown rooms must not take a slot in the view cache.
    fetch_chat(services, &chat).await?;
    Ok(Json(services.rooms.messages(&chat).await?))
}

async fn widget_send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<WidgetMessageRequest>,
) -> Result<(StatusCode, Json<SendOutcome>), ServerError> {
    let chat = chat_id(&id)?;
    let services = state.services().await?;

    // The widget may only post into the room opened for its customer.
    let room = fetch_chat(services, &chat).await?;
    let owner = room.get("user_id").and_then(Value::as_str).unwrap_or_default();
    let sender = customer_id(&req.user_id)?;
    if owner != sender.to_string() {
        return Err(ServerError::Forbidden("Chat belongs to another customer".into()));
    }

    let actor = Actor {
        id: sender.to_string(),
        role: Role::Customer,
    };
    let outcome = services
        .dispatcher
        .send_message(&chat, &actor, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

// ─── Chat rooms ───

async fn admin_chats(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<ChatListQuery>,
) -> Result<Json<Vec<ChatRoom>>, ServerError> {
    require_admin(&headers, &state.config)?;
    let services = state.services().await?;
    let mut rooms = services.chats.snapshot();
    if let Some(status) = query.status {
        let status = ChatStatus::parse(&status);
        rooms.retain(|room| room.status == status);
    }
    Ok(Json(rooms))
}

async fn admin_set_status(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Ack>, ServerError> {
    let admin = require_admin(&headers, &state.config)?;
    let chat = chat_id(&id)?;
    let status = match ChatStatus::parse(&req.status) {
        ChatStatus::Unknown => {
            return Err(ServerError::BadRequest(format!(
                "Unknown chat status: {}",
                req.status
            )))
        }
        status => status,
    };

    let services = state.services().await?;
    let ack = services.dispatcher.set_chat_status(&chat, status).await?;
    info!(chat = %chat, %status, admin = %admin.id, "Chat status changed");
    Ok(Json(ack))
}

async fn admin_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ServerError> {
    require_admin(&headers, &state.config)?;
    let chat = chat_id(&id)?;
    let services = state.services().await?;
    // Unknown rooms must not take a slot in the view cache.
    fetch_chat(services, &chat).await?;
    Ok(Json(services.rooms.messages(&chat).await?))
}

async fn admin_send_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AdminMessageRequest>,
) -> Result<(StatusCode, Json<SendOutcome>), ServerError> {
    let admin = require_admin(&headers, &state.config)?;
    let chat = chat_id(&id)?;
    let services = state.services().await?;
    fetch_chat(services, &chat).await?;
    let outcome = services
        .dispatcher
        .send_message(&chat, &admin, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

// ─── Customers ───

async fn admin_users(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<Customer>>, ServerError> {
    require_admin(&headers, &state.config)?;
    let services = state.services().await?;
    Ok(Json(services.customers.snapshot()))
}

async fn admin_create_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<Ack>), ServerError> {
    require_admin(&headers, &state.config)?;
    let services = state.services().await?;
    let ack = services
        .dispatcher
        .create_customer(&req.name, &req.email)
        .await?;
    Ok((StatusCode::CREATED, Json(ack)))
}

async fn admin_edit_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EditUserRequest>,
) -> Result<Json<Ack>, ServerError> {
    require_admin(&headers, &state.config)?;
    let customer = customer_id(&id)?;
    let services = state.services().await?;
    let ack = services
        .dispatcher
        .edit_customer(&customer, req.name.as_deref(), req.email.as_deref())
        .await?;
    Ok(Json(ack))
}

async fn admin_delete_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Ack>, ServerError> {
    let admin = require_admin(&headers, &state.config)?;
    let customer = customer_id(&id)?;
    let services = state.services().await?;
    let ack = services.dispatcher.delete_customer(&customer).await?;
    info!(customer = %customer, admin = %admin.id, "Customer deleted");
    Ok(Json(ack))
}

// ─── Analytics ───

async fn dashboard_cards(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<SummaryCard>>, ServerError> {
    require_admin(&headers, &state.config)?;
    let services = state.services().await?;
    Ok(Json(services.dashboard.cards.current()))
}

async fn dashboard_chart(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<ChartPoint>>, ServerError> {
    require_admin(&headers, &state.config)?;
    let services = state.services().await?;
    Ok(Json(services.dashboard.chart.current()))
}

async fn dashboard_top_admins(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<AdminSummary>>, ServerError> {
    require_admin(&headers, &state.config)?;
    let services = state.services().await?;
    Ok(Json(services.dashboard.top_admins.current()))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::request::Builder;
    use axum::http::Request;
    use deskline_live::ConnectionProvider;
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    const TOKEN: &str = "test-token";

    fn app() -> Router {
        let config = ServerConfig {
            admin_token: Some(TOKEN.into()),
            ..ServerConfig::default()
        };
        build_router(AppState {
            backend: Arc::new(Backend::new(ConnectionProvider::in_memory(), Vec::new())),
            config: Arc::new(config),
        })
    }

    fn builder(method: &str, uri: &str) -> Builder {
        Request::builder().method(method).uri(uri)
    }

    fn with_body(builder: Builder, body: Option<Value>) -> Request<Body> {
        match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = builder(method, uri)
            .header("authorization", format!("Bearer {TOKEN}"))
            .header(ACTOR_ID_HEADER, "admin_1")
            .header(ACTOR_ROLE_HEADER, "admin");
        with_body(builder, body)
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Poll an admin GET until `done` accepts the body.
    async fn poll(app: &Router, uri: &str, done: impl Fn(&Value) -> bool) -> Value {
        for _ in 0..200 {
            let (status, body) = call(app, admin_request("GET", uri, None)).await;
            assert_eq!(status, StatusCode::OK);
            if done(&body) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{uri} never reached the expected state");
    }

    async fn start_chat(app: &Router) -> (String, String) {
        let (status, body) = call(
            app,
            with_body(
                builder("POST", "/widget/chats"),
                Some(json!({"name": "Ada", "email": "ada@example.com"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["chat"]["id"].as_str().unwrap().to_string(),
            body["customer"]["id"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&app(), with_body(builder("GET", "/health"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_admin_endpoints_require_admin_claims() {
        let app = app();

        let no_token = with_body(
            builder("GET", "/admin/chats")
                .header(ACTOR_ID_HEADER, "admin_1")
                .header(ACTOR_ROLE_HEADER, "admin"),
            None,
        );
        assert_eq!(call(&app, no_token).await.0, StatusCode::FORBIDDEN);

        let customer = with_body(
            builder("GET", "/admin/chats")
                .header("authorization", format!("Bearer {TOKEN}"))
                .header(ACTOR_ID_HEADER, "someone"),
            None,
        );
        assert_eq!(call(&app, customer).await.0, StatusCode::FORBIDDEN);

        let anonymous = with_body(
            builder("GET", "/admin/chats").header("authorization", format!("Bearer {TOKEN}")),
            None,
        );
        assert_eq!(call(&app, anonymous).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_widget_chat_reaches_admin_list_and_dashboard() {
        let app = app();
        let (chat, _) = start_chat(&app).await;

        let rooms = poll(&app, "/admin/chats", |b| b.as_array().unwrap().len() == 1).await;
        assert_eq!(rooms[0]["id"], chat.as_str());
        assert_eq!(rooms[0]["status"], "pending");
        assert_eq!(rooms[0]["customer"], "Ada");

        let cards = poll(&app, "/admin/dashboard/cards", |b| b[0]["description"] == "1").await;
        assert_eq!(cards[2]["title"], "Pending Chats");
        assert_eq!(cards[2]["description"], "1");

        let pending = poll(&app, "/admin/chats?status=active", |_| true).await;
        assert!(pending.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admin_reply_activates_room() {
        let app = app();
        let (chat, _) = start_chat(&app).await;

        let (status, body) = call(
            &app,
            admin_request(
                "POST",
                &format!("/admin/chats/{chat}/messages"),
                Some(json!({"content": "Hello, how can I help?"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status_transition"]["outcome"], "applied");

        poll(&app, "/admin/chats", |b| b[0]["status"] == "active").await;
        let messages = poll(&app, &format!("/admin/chats/{chat}/messages"), |b| {
            b.as_array().unwrap().len() == 1
        })
        .await;
        assert_eq!(messages[0]["body"], "Hello, how can I help?");
        assert_eq!(messages[0]["senderId"], "admin_1");
    }

    #[tokio::test]
    async fn test_widget_cannot_post_into_someone_elses_chat() {
        let app = app();
        let (chat, customer) = start_chat(&app).await;

        let own = with_body(
            builder("POST", &format!("/widget/chats/{chat}/messages")),
            Some(json!({"user_id": customer, "content": "hi"})),
        );
        assert_eq!(call(&app, own).await.0, StatusCode::CREATED);

        let foreign = with_body(
            builder("POST", &format!("/widget/chats/{chat}/messages")),
            Some(json!({"user_id": "chat_user:intruder", "content": "hi"})),
        );
        assert_eq!(call(&app, foreign).await.0, StatusCode::FORBIDDEN);

        let missing = with_body(
            builder("POST", "/widget/chats/nope/messages"),
            Some(json!({"user_id": customer, "content": "hi"})),
        );
        assert_eq!(call(&app, missing).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_room_messages_are_not_found() {
        let backend = Arc::new(Backend::new(ConnectionProvider::in_memory(), Vec::new()));
        let app = build_router(AppState {
            backend: Arc::clone(&backend),
            config: Arc::new(ServerConfig {
                admin_token: Some(TOKEN.into()),
                ..ServerConfig::default()
            }),
        });
        let (chat, _) = start_chat(&app).await;

        let missing = with_body(builder("GET", "/widget/chats/nope/messages"), None);
        assert_eq!(call(&app, missing).await.0, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, admin_request("GET", "/admin/chats/nope/messages", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let rooms = &backend.services().await.unwrap().rooms;
        assert_eq!(rooms.open_count().await, 0);

        let own = with_body(builder("GET", &format!("/widget/chats/{chat}/messages")), None);
        assert_eq!(call(&app, own).await.0, StatusCode::OK);
        assert_eq!(rooms.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_status_and_customer_management() {
        let app = app();
        let (chat, customer) = start_chat(&app).await;

        let (status, _) = call(
            &app,
            admin_request(
                "POST",
                &format!("/admin/chats/{chat}/status"),
                Some(json!({"status": "archived"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            admin_request(
                "POST",
                &format!("/admin/chats/{chat}/status"),
                Some(json!({"status": "closed"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            admin_request(
                "PUT",
                &format!("/admin/users/{customer}"),
                Some(json!({"email": "ada@lovelace.dev"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["record"]["email"], "ada@lovelace.dev");

        let (status, _) = call(
            &app,
            admin_request("DELETE", &format!("/admin/users/{customer}"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        poll(&app, "/admin/users", |b| b.as_array().unwrap().is_empty()).await;

        let (status, _) = call(
            &app,
            admin_request("DELETE", &format!("/admin/users/{customer}"), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
