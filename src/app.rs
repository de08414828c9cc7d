//! HTTP surface and process bootstrap. Handlers stay thin: validate, resolve
//! the session, hand off to the orchestrator, map the outcome to JSON.

use std::env;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::ai::AnthropicGenerator;
use crate::crm::{ChurnZeroCrm, ContactVerification, Crm};
use crate::notifier::{EscalationNotifier, SendGridNotifier};
use crate::orchestrator;
use crate::store::{ConversationStore, PgStore};
use crate::tracker::{ProjectTracker, TrelloTracker};
use crate::types::{
    now_iso, AppState, EscalateBody, MessageBody, SessionRecord, TicketCategory, VerifyBody,
};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern should compile")
});

fn normalize_email(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn resolve_database_url() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return url;
        }
    }
    let host = env::var("POSTGRES_HOST")
        .or_else(|_| env::var("PGHOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_else(|_| "postgres".to_string());
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "support_chat".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": now_iso() }))
}

/// Loads and gate-checks a session. Session troubles never leak store error
/// text to the client.
async fn require_session(
    state: &AppState,
    session_id: &str,
) -> Result<SessionRecord, (StatusCode, Json<Value>)> {
    let session = state
        .store
        .get_session(session_id)
        .await
        .map_err(|err| {
            error!(error = %err, "session lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to load session" })),
            )
        })?
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found" })),
        ))?;

    if !session.verified {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Session not verified" })),
        ));
    }
    if session.is_expired() {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Session expired. Please verify your email again." })),
        ));
    }
    Ok(session)
}

async fn verify_email(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyBody>,
) -> impl IntoResponse {
    let email = normalize_email(body.email.as_deref().unwrap_or(""));
    if email.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Email is required" })),
        )
            .into_response();
    }
    if !EMAIL_RE.is_match(&email) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid email format" })),
        )
            .into_response();
    }

    let verification = match state.crm.verify_primary_contact(&email).await {
        Ok(verification) => verification,
        Err(err) => {
            // CRM trouble must not lock clients out of support.
            warn!(error = %err, "contact verification failed, allowing session");
            ContactVerification {
                verified: true,
                account: None,
            }
        }
    };

    if !verification.verified {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "verified": false,
                "message": "Email not found as primary contact. Please contact support directly."
            })),
        )
            .into_response();
    }

    let session = match state.store.create_session(&email, true).await {
        Ok(session) => session,
        Err(err) => {
            error!(error = %err, "failed to create session");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to create session" })),
            )
                .into_response();
        }
    };

    let mut payload = json!({
        "verified": true,
        "sessionId": session.id,
        "clientEmail": session.client_email,
    });
    if let Some(account) = verification.account {
        payload["account"] = json!({
            "id": account.id,
            "name": account.name,
            "status": account.status,
        });
    }
    (StatusCode::OK, Json(payload)).into_response()
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MessageBody>,
) -> impl IntoResponse {
    let message = body.message.as_deref().map(str::trim).unwrap_or("");
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Message is required" })),
        )
            .into_response();
    }

    let client_email = match body
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        Some(session_id) => match require_session(&state, session_id).await {
            Ok(session) => session.client_email,
            Err(rejection) => return rejection.into_response(),
        },
        None => "anonymous".to_string(),
    };

    let category_hint = body.category.as_deref().and_then(TicketCategory::from_str);

    match orchestrator::respond_to_message(
        &state,
        &client_email,
        message,
        body.conversation_id.as_deref(),
        category_hint,
    )
    .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "response": outcome.response,
                "conversationId": outcome.conversation_id,
                "escalated": outcome.escalated,
                "escalationReason": outcome.escalation_reason,
            })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "message pipeline failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to process message" })),
            )
                .into_response()
        }
    }
}

async fn post_escalate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EscalateBody>,
) -> impl IntoResponse {
    let Some(session_id) = body
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Session ID is required" })),
        )
            .into_response();
    };

    let session = match require_session(&state, session_id).await {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };

    match orchestrator::manual_escalate(&state, &session.client_email, body.reason.as_deref())
        .await
    {
        Ok(Some(conversation_id)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Escalation triggered successfully",
                "conversationId": conversation_id,
            })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No active conversation found" })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "manual escalation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to escalate conversation" })),
            )
                .into_response()
        }
    }
}

pub async fn run() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3000);
    let database_url = resolve_database_url();
    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)");

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("failed to run sqlx migrations");

    let state = Arc::new(AppState {
        store: Arc::new(PgStore::new(db)),
        crm: Arc::new(ChurnZeroCrm::from_env()),
        tracker: Arc::new(TrelloTracker::from_env()),
        generator: Arc::new(AnthropicGenerator::from_env()),
        notifier: Arc::new(SendGridNotifier::from_env()),
    });
    info!(
        crm = state.crm.is_configured(),
        tracker = state.tracker.is_configured(),
        notifier = state.notifier.is_configured(),
        "integration credentials detected"
    );

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/verify", post(verify_email))
        .route("/api/message", post(post_message))
        .route("/api/escalate", post(post_escalate))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    println!("support chat server running at http://localhost:{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}
