//! HTTP routes.
//!
//! # Endpoints
//!
//! - `GET /health`: health check (no auth)
//! - `POST /auth/register`, `POST /auth/login`: obtain a session token (no auth)
//! - `GET /auth/me`: caller's account (any role)
//! - `GET /pdf/list`: documents visible to the caller (any role)
//! - `GET /pdf/{id}/file`: stored content of a visible document (any role)
//! - `POST /pdf/upload`: multipart upload, fields `title` and `pdf` (publisher)
//! - `POST /pdf/assign`: assign a document to a subscriber (publisher)

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, rejection::PathRejection,
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use super::guard::{require_auth, require_publisher, AuthUser};
use super::registry::{Assignment, DocumentRegistry, RegistryError};
use super::storage::{ServerStorage, StorageError};
use super::tokens::TokenService;
use super::users::UserStore;
use crate::models::{Document, DocumentId, Role, User, UserId};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub tokens: Arc<TokenService>,
    pub registry: Arc<DocumentRegistry>,
    pub storage: Arc<ServerStorage>,
}

impl AppState {
    /// Wires the components together. The registry resolves accounts through
    /// the same credential store the handlers use.
    pub fn new(
        users: UserStore,
        documents: Vec<Document>,
        tokens: TokenService,
        storage: ServerStorage,
    ) -> Self {
        let users = Arc::new(users);
        let registry = Arc::new(DocumentRegistry::restore(Arc::clone(&users), documents));

        Self {
            users,
            tokens: Arc::new(tokens),
            registry,
            storage: Arc::new(storage),
        }
    }

    async fn persist(&self) -> Result<(), StorageError> {
        self.storage.flush(&self.users, &self.registry).await
    }
}

/// Builds the application router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let tokens = Arc::clone(&state.tokens);

    // Public routes (no auth)
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login));

    // Any authenticated caller
    let member_routes = Router::new()
        .route("/auth/me", get(me))
        .route("/pdf/list", get(list))
        .route("/pdf/{id}/file", get(download))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&tokens),
            require_auth,
        ));

    // Publishers only; `require_auth` is the outer layer and runs first
    let publisher_routes = Router::new()
        .route("/pdf/upload", post(upload))
        .route("/pdf/assign", post(assign))
        .route_layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(tokens, require_auth))
                .layer(middleware::from_fn(require_publisher)),
        );

    Router::new()
        .merge(public_routes)
        .merge(member_routes)
        .merge(publisher_routes)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    message: &'static str,
    token: String,
    user: User,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
    pdf: Document,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    #[serde(alias = "pdfId", deserialize_with = "number_or_string")]
    pub document_id: DocumentId,
    #[serde(alias = "userId", deserialize_with = "number_or_string")]
    pub target_user_id: UserId,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

/// Reads an id sent either as a JSON number or as a decimal string.
fn number_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let text = match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n.to_string(),
        NumberOrString::Text(s) => s,
    };
    text.parse().map_err(serde::de::Error::custom)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = json_body(payload)?;
    let user = state
        .users
        .register(&request.username, &request.password, request.role)?;
    state.persist().await?;

    let token = state.tokens.issue(user.id, user.role)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully",
            token,
            user,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = json_body(payload)?;
    let user = state
        .users
        .authenticate(&request.username, &request.password)
        .inspect_err(|_| tracing::warn!("Failed login for '{}'", request.username))?;

    let token = state.tokens.issue(user.id, user.role)?;
    Ok(Json(AuthResponse {
        message: "Login successful",
        token,
        user,
    }))
}

/// Current caller's account
async fn me(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<User>, ApiError> {
    state
        .users
        .get(caller.user_id)
        .map(Json)
        .ok_or_else(|| RegistryError::UserNotFound(caller.user_id).into())
}

async fn upload(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut title = None;
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("title") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                title = Some(text.trim().to_string()).filter(|t| !t.is_empty());
            }
            Some("pdf") => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                file = Some((file_name, bytes));
            }
            _ => {}
        }
    }

    let (file_name, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("Missing file field 'pdf'".to_string()))?;
    let title = title
        .or_else(|| file_name.clone())
        .unwrap_or_else(|| "Untitled".to_string());

    let locator = state
        .storage
        .store_upload(file_name.as_deref(), bytes.to_vec())
        .await?;

    let document = match state.registry.create(caller.user_id, &title, locator.clone()) {
        Ok(document) => document,
        Err(e) => {
            if let Err(cleanup) = state.storage.remove_upload(&locator).await {
                tracing::warn!("Failed to remove orphaned upload {}: {}", locator, cleanup);
            }
            return Err(e.into());
        }
    };
    state.persist().await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "PDF uploaded successfully",
            pdf: document,
        }),
    ))
}

async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> Json<Vec<Document>> {
    Json(state.registry.list_visible(caller.user_id, caller.role))
}

async fn assign(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = json_body(payload)?;

    // Publishers manage only their own documents. Other publishers' documents
    // are reported as missing.
    state
        .registry
        .get_visible(request.document_id, caller.user_id, Role::Publisher)
        .ok_or(RegistryError::DocumentNotFound(request.document_id))?;

    let outcome = state
        .registry
        .assign(request.document_id, request.target_user_id)?;
    if outcome == Assignment::Added {
        state.persist().await?;
    }

    Ok(Json(MessageResponse {
        message: "PDF assigned successfully",
    }))
}

async fn download(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    id: Result<Path<DocumentId>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(id) = id.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let document = state
        .registry
        .get_visible(id, caller.user_id, caller.role)
        .ok_or(RegistryError::DocumentNotFound(id))?;

    let bytes = state.storage.read_upload(&document.storage_locator).await?;
    let content_type = if document.storage_locator.as_str().ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/octet-stream"
    };

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}
