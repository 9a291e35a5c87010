//! # REST API
//!
//! Builds the axum router for registration, login, credential downloads, and
//! signed-document storage. Handlers share state through axum's `State`.
//!
//! ## Endpoints
//!
//! | Method | Path                            | Description                          |
//! |--------|---------------------------------|--------------------------------------|
//! | GET    | `/health`                       | Liveness probe                       |
//! | POST   | `/register`                     | Issue credentials (JSON)             |
//! | GET    | `/credentials/:identifier/:file`| Download `.key`, `.cer`, or bundle   |
//! | POST   | `/login`                        | Proof-of-possession login (multipart)|
//! | POST   | `/logout`                       | Revoke the session cookie            |
//! | GET    | `/documents`                    | List the caller's PDFs               |
//! | POST   | `/documents`                    | Upload a PDF (multipart)             |
//! | GET    | `/documents/:file`              | Download one of the caller's PDFs    |
//!
//! Issuance, Argon2, and key decryption are CPU-bound and run on tokio's
//! blocking pool so they never stall the reactor.
//!
//! Every login failure is a 401 with the same body. The reason is logged by
//! the verifier and counted in `login_failures_total`.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use firma_core::auth::Session;
use firma_core::config::SESSION_COOKIE_NAME;
use firma_core::credentials::CredentialArtifact;
use firma_core::identity::RegistrationRequest;
use firma_core::storage::{DocumentEntry, DocumentError};
use firma_core::{CredentialService, FirmaError, FirmaResult};

use crate::metrics::SharedMetrics;

/// Upper bound on request bodies. PDFs are the largest thing we accept.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Body of every 401 response.
const AUTH_FAILED: &str = "authentication failed";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for all handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CredentialService>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/register", post(register_handler))
        .route("/credentials/:identifier/:file", get(credential_handler))
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
        .route(
            "/documents",
            get(list_documents_handler).post(upload_document_handler),
        )
        .route("/documents/:file", get(download_document_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `POST /register`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub identifier: String,
    pub serial: String,
    pub fingerprint: String,
    pub not_before: String,
    pub not_after: String,
    pub key_url: String,
    pub certificate_url: String,
    pub bundle_url: String,
}

/// Response payload for `POST /login`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub status: String,
    pub identifier: String,
}

/// Response payload for `GET /documents`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub name: String,
    pub size: u64,
}

impl From<DocumentEntry> for DocumentInfo {
    fn from(entry: DocumentEntry) -> Self {
        Self {
            name: entry.name,
            size: entry.size,
        }
    }
}

/// Generic error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An error already mapped to its HTTP status and public message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, AUTH_FAILED)
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not found")
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl From<FirmaError> for ApiError {
    fn from(err: FirmaError) -> Self {
        match err {
            FirmaError::Validation(e) => ApiError::bad_request(e.to_string()),
            FirmaError::Conflict(id) => ApiError::new(
                StatusCode::CONFLICT,
                format!("identifier {id} is already registered"),
            ),
            FirmaError::NotFound(_) => ApiError::not_found(),
            FirmaError::Auth(_) => ApiError::unauthorized(),
            FirmaError::Document(DocumentError::NotFound(_)) => ApiError::not_found(),
            FirmaError::Document(e @ (DocumentError::NotPdf | DocumentError::InvalidName)) => {
                ApiError::bad_request(e.to_string())
            }
            other => {
                tracing::error!(error = %other, "request failed");
                ApiError::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Run a service call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<FirmaResult<T>, ApiError>
where
    F: FnOnce() -> FirmaResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!(error = %e, "blocking task failed");
        ApiError::internal()
    })
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Pull the session token out of the `Cookie` header(s), if present.
fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, token)| token.to_string())
        .filter(|token| !token.is_empty())
}

fn require_session(state: &AppState, headers: &HeaderMap) -> Result<Session, ApiError> {
    let token = session_token(headers).ok_or_else(ApiError::unauthorized)?;
    state
        .service
        .resolve_session(&token)?
        .ok_or_else(ApiError::unauthorized)
}

fn session_cookie(token: &str, max_age: Option<u64>) -> String {
    let mut cookie = format!("{SESSION_COOKIE_NAME}={token}; HttpOnly; Path=/; SameSite=Strict");
    if let Some(secs) = max_age {
        cookie.push_str(&format!("; Max-Age={secs}"));
    }
    cookie
}

fn cleared_cookie() -> String {
    format!("{SESSION_COOKIE_NAME}=; HttpOnly; Path=/; SameSite=Strict; Max-Age=0")
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `POST /register` - validate, issue, persist, and return download links.
async fn register_handler(
    State(state): State<AppState>,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        state
            .metrics
            .registration_failures_total
            .with_label_values(&["validation"])
            .inc();
        ApiError::bad_request(rejection.body_text())
    })?;
    let service = Arc::clone(&state.service);
    let started = Instant::now();
    let result = blocking(move || service.register(&request)).await?;

    let registration = match result {
        Ok(registration) => registration,
        Err(err) => {
            let reason = match &err {
                FirmaError::Validation(_) => "validation",
                FirmaError::Conflict(_) => "conflict",
                _ => "internal",
            };
            state
                .metrics
                .registration_failures_total
                .with_label_values(&[reason])
                .inc();
            return Err(err.into());
        }
    };

    state
        .metrics
        .issuance_duration_seconds
        .observe(started.elapsed().as_secs_f64());
    state.metrics.registrations_total.inc();

    let id = registration.identifier.as_str();
    let url = |artifact: CredentialArtifact| {
        format!(
            "/credentials/{id}/{}",
            artifact.file_name(&registration.identifier)
        )
    };
    let body = RegisterResponse {
        identifier: id.to_string(),
        serial: registration.serial.clone(),
        fingerprint: registration.fingerprint.clone(),
        not_before: registration.not_before.to_rfc3339(),
        not_after: registration.not_after.to_rfc3339(),
        key_url: url(CredentialArtifact::PrivateKey),
        certificate_url: url(CredentialArtifact::Certificate),
        bundle_url: url(CredentialArtifact::Bundle),
    };
    Ok((StatusCode::CREATED, Json(body)))
}

/// `GET /credentials/:identifier/:file`
async fn credential_handler(
    State(state): State<AppState>,
    Path((identifier, file)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let service = Arc::clone(&state.service);
    let name = file.clone();
    let (artifact, bytes) = blocking(move || service.credential_file(&identifier, &name)).await??;
    Ok(attachment(artifact.content_type(), &file, bytes))
}

/// `POST /login` - multipart `identifier`, `certificate`, `private_key`, `passphrase`.
async fn login_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut identifier = None;
    let mut certificate = None;
    let mut private_key = None;
    let mut passphrase = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("malformed multipart body"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|_| ApiError::bad_request("malformed multipart body"))?;
        match name.as_str() {
            "identifier" => identifier = Some(String::from_utf8_lossy(&bytes).into_owned()),
            "passphrase" => passphrase = Some(String::from_utf8_lossy(&bytes).into_owned()),
            "certificate" => certificate = Some(bytes.to_vec()),
            "private_key" => private_key = Some(bytes.to_vec()),
            _ => {}
        }
    }

    let (Some(identifier), Some(certificate), Some(private_key), Some(passphrase)) =
        (identifier, certificate, private_key, passphrase)
    else {
        return Err(ApiError::bad_request(
            "identifier, certificate, private_key and passphrase are required",
        ));
    };

    let service = Arc::clone(&state.service);
    let result =
        blocking(move || service.login(&identifier, &certificate, &private_key, &passphrase))
            .await?;

    let grant = match result {
        Ok(grant) => grant,
        Err(FirmaError::Auth(err)) => {
            state
                .metrics
                .login_failures_total
                .with_label_values(&[err.kind().as_str()])
                .inc();
            return Err(ApiError::unauthorized());
        }
        Err(other) => return Err(other.into()),
    };
    state.metrics.logins_total.inc();

    let max_age = state
        .service
        .config()
        .session_ttl
        .map(|ttl| ttl.as_secs());
    let cookie = HeaderValue::from_str(&session_cookie(grant.token.as_str(), max_age))
        .map_err(|_| ApiError::internal())?;

    let body = LoginResponse {
        status: "ok".to_string(),
        identifier: grant.session.identifier.to_string(),
    };
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// `POST /logout` - revoke the session (if any) and clear the cookie.
async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(token) = session_token(&headers) {
        if state.service.logout(&token)? {
            state.metrics.logouts_total.inc();
        }
    }
    Ok((
        [(header::SET_COOKIE, cleared_cookie())],
        Json(serde_json::json!({ "status": "ok" })),
    )
        .into_response())
}

/// `GET /documents`
async fn list_documents_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DocumentListResponse>, ApiError> {
    let session = require_session(&state, &headers)?;
    let service = Arc::clone(&state.service);
    let docs = blocking(move || service.list_documents(&session)).await??;
    Ok(Json(DocumentListResponse {
        documents: docs.into_iter().map(DocumentInfo::from).collect(),
    }))
}

/// `POST /documents` - multipart field `archivo` or `file`.
async fn upload_document_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let session = require_session(&state, &headers)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("malformed multipart body"))?
    {
        if !matches!(field.name(), Some("archivo" | "file")) {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("file field has no file name"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|_| ApiError::bad_request("malformed multipart body"))?;
        upload = Some((file_name, bytes));
        break;
    }
    let (file_name, bytes) = upload.ok_or_else(|| ApiError::bad_request("no file uploaded"))?;

    let service = Arc::clone(&state.service);
    let entry =
        blocking(move || service.upload_document(&session, &file_name, &bytes)).await??;
    state.metrics.documents_uploaded_total.inc();

    Ok((StatusCode::CREATED, Json(DocumentInfo::from(entry))))
}

/// `GET /documents/:file`
async fn download_document_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    let session = require_session(&state, &headers)?;
    let service = Arc::clone(&state.service);
    let name = file.clone();
    let bytes = blocking(move || service.download_document(&session, &name)).await??;
    Ok(attachment("application/pdf", &file, bytes))
}

fn attachment(content_type: &'static str, file_name: &str, bytes: Vec<u8>) -> Response {
    // Names reaching here are whitelisted or sanitized; quotes still get stripped.
    let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', ""));
    let mut response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
