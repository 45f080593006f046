//! HTTP handlers for the connector service.
//!
//! All handlers receive `SharedState` via Axum state extraction. JSON
//! errors go through `ApiError::into_response`; the OAuth callback
//! answers with HTML pages instead, since its caller is a browser.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use chrono_tz::America::Sao_Paulo;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use crate::error::ApiError;
use crate::hubspot::portal_id_from_account_info;
use crate::store::TokenUpsert;
use crate::SharedState;

pub fn app_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/oauth/callback", get(oauth_callback))
        // ── Tokens ───────────────────────────────────────────────────────
        .route("/token/status/{hub_id}", get(token_status))
        .route("/token/{hub_id}", get(token_get))
        // ── PABX frontend API ────────────────────────────────────────────
        .route("/api/save-credentials", post(save_credentials))
        .route("/api/validate-hub", get(validate_hub))
        .route("/api/get-users", get(get_users))
        .route("/api/save-extensions", post(save_extensions))
        .route("/api/get-hub-data", get(get_hub_data))
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "pabx-hubspot-auth",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn index(State(state): State<SharedState>) -> Html<String> {
    Html(format!(
        "<h1>HubSpot OAuth Integration</h1>\n\
         <p>Servidor rodando na porta {}</p>\n\
         <p>Use /oauth/callback para o redirect do HubSpot</p>",
        state.config.port
    ))
}

// =============================================================================
// OAuth callback
// =============================================================================

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
}

/// GET /oauth/callback — HubSpot redirects here with an authorization code.
///
/// Outcomes: missing code → 400 without contacting HubSpot; exchange or
/// persistence failure → 500 error page; success → confirmation page that
/// sends the browser back to the portal's installed-integrations screen.
async fn oauth_callback(
    State(state): State<SharedState>,
    Query(q): Query<CallbackQuery>,
) -> Response {
    let Some(code) = q.code.filter(|c| !c.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Html("❌ Código de autorização não encontrado".to_string()),
        )
            .into_response();
    };

    match connect_portal(&state, &code).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            tracing::error!("OAuth callback failed: {e}");
            let page = format!(
                "<h1 style=\"color:red;\">Erro ao autenticar</h1>\n<pre>{e}</pre>"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, Html(page)).into_response()
        }
    }
}

/// Exchange the code, resolve the portal id, persist the tokens and build
/// the confirmation page.
async fn connect_portal(state: &SharedState, code: &str) -> Result<String, ApiError> {
    let tokens = state.hubspot.exchange_code(code).await?;

    // Portal id priority: token response, then account info, then a
    // timestamp surrogate.
    let from_token_response = tokens.hub_id.is_some();
    let portal_id = match tokens.hub_id {
        Some(id) => id,
        None => match state.hubspot.account_info(&tokens.access_token).await {
            Ok(info) => portal_id_from_account_info(&info)
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
            Err(e) => {
                tracing::error!("Failed to fetch account info: {e}");
                Utc::now().timestamp_millis()
            }
        },
    };

    let now = Utc::now();
    let expires_at = now + chrono::Duration::seconds(tokens.expires_in as i64);

    state
        .store
        .upsert_token(&TokenUpsert {
            hub_id: portal_id.to_string(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at,
        })
        .await?;

    tracing::info!("Portal {portal_id} connected, token expires at {expires_at}");

    Ok(success_page(portal_id, expires_at, from_token_response))
}

fn success_page(portal_id: i64, expires_at: DateTime<Utc>, from_token_response: bool) -> String {
    let return_url = format!("https://app.hubspot.com/integrations-settings/{portal_id}/installed");
    let expires_local = expires_at.with_timezone(&Sao_Paulo).format("%d/%m/%Y %H:%M:%S");
    let method = if from_token_response { "OAuth Response" } else { "Account API" };

    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 50px auto; padding: 20px; text-align: center;">
  <h1 style="color: #00A4BD;">✅ Integração Concluída!</h1>
  <p>Portal ID: <strong>{portal_id}</strong></p>
  <p>Token expira em: <strong>{expires_local}</strong></p>
  <div style="margin: 20px 0; padding: 15px; background: #f8f9fa; border-radius: 8px; text-align: left;">
    <h3>🔍 Debug Info:</h3>
    <p><strong>Portal ID final:</strong> {portal_id}</p>
    <p><strong>Método usado:</strong> {method}</p>
  </div>
  <p style="margin: 30px 0;">
    <a href="{return_url}" style="background: #00A4BD; color: white; padding: 12px 24px; text-decoration: none; border-radius: 4px; display: inline-block;">
      Voltar para o HubSpot
    </a>
  </p>
  <p style="color: #666; font-size: 14px;">Você será redirecionado automaticamente em 5 segundos...</p>
  <script>
    setTimeout(() => {{
      window.location.href = '{return_url}';
    }}, 5000);
  </script>
</div>"#
    )
}

// =============================================================================
// Token endpoints
// =============================================================================

/// GET /token/:hub_id — Get a valid access token (auto-refreshes if expired).
async fn token_get(
    State(state): State<SharedState>,
    Path(hub_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = state.lifecycle.valid_access_token(&hub_id).await?;

    Ok(Json(json!({
        "accessToken": token.access_token,
        "renewed": token.renewed,
    })))
}

/// GET /token/status/:hub_id — Token bookkeeping for a hub, without the token itself.
async fn token_status(
    State(state): State<SharedState>,
    Path(hub_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .store
        .get_token(&hub_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Hub {hub_id}")))?;

    let expired = state.lifecycle.is_expired(&hub_id).await?;

    Ok(Json(json!({
        "hubId": hub_id,
        "hasToken": true,
        "expired": expired,
        "expiresAt": record.expires_at,
        "createdAt": record.created_at,
        "updatedAt": record.updated_at,
    })))
}

// =============================================================================
// PABX frontend API
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveCredentialsBody {
    token: Option<String>,
    client_id: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// POST /api/save-credentials — Register a hub out-of-band with a generated
/// surrogate id.
async fn save_credentials(
    State(state): State<SharedState>,
    Json(body): Json<SaveCredentialsBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = body
        .token
        .ok_or_else(|| ApiError::BadRequest("token is required".into()))?;
    let client_id = body
        .client_id
        .ok_or_else(|| ApiError::BadRequest("clientId is required".into()))?;
    let access_token = body
        .access_token
        .ok_or_else(|| ApiError::BadRequest("accessToken is required".into()))?;
    let expires_in = body
        .expires_in
        .ok_or_else(|| ApiError::BadRequest("expiresIn is required".into()))?;

    let hub_id = surrogate_hub_id();
    let expires_at = Utc::now() + chrono::Duration::seconds(expires_in);

    state
        .store
        .upsert_credentials(
            &hub_id,
            &token,
            &client_id,
            &access_token,
            body.refresh_token.as_deref(),
            expires_at,
        )
        .await?;

    Ok(Json(json!({ "success": true, "hubId": hub_id })))
}

#[derive(Deserialize)]
struct HubIdQuery {
    hub_id: Option<String>,
}

/// GET /api/validate-hub — Cheap existence check used by the frontend to
/// skip the login screen.
async fn validate_hub(
    State(state): State<SharedState>,
    Query(q): Query<HubIdQuery>,
) -> Result<Response, ApiError> {
    let Some(hub_id) = q.hub_id else {
        return Ok((StatusCode::BAD_REQUEST, Json(json!({ "valid": false }))).into_response());
    };

    let valid = state.store.hub_exists(&hub_id).await?;
    Ok(Json(json!({ "valid": valid })).into_response())
}

/// GET /api/get-users — HubSpot users for a hub, merged with the saved
/// extension mapping. Refreshes the access token first when needed.
async fn get_users(
    State(state): State<SharedState>,
    Query(q): Query<HubIdQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hub_id = q
        .hub_id
        .ok_or_else(|| ApiError::BadRequest("Hub ID is required".into()))?;

    let token = state.lifecycle.valid_access_token(&hub_id).await?;
    let users = state.hubspot.list_users(&token.access_token).await?;
    let extensions = state.store.list_extensions(&hub_id).await?;

    Ok(Json(json!({
        "success": true,
        "users": users,
        "extensions": extensions,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveExtensionsBody {
    hub_id: Option<String>,
    #[serde(default)]
    extensions: HashMap<String, String>,
}

/// POST /api/save-extensions — Replace the hub's extension set wholesale.
/// Blank extensions are dropped rather than stored.
async fn save_extensions(
    State(state): State<SharedState>,
    Json(body): Json<SaveExtensionsBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hub_id = body
        .hub_id
        .ok_or_else(|| ApiError::BadRequest("Hub ID is required".into()))?;

    if !state.store.hub_exists(&hub_id).await? {
        return Err(ApiError::NotFound(format!("Hub {hub_id}")));
    }

    let entries = sanitize_extensions(&body.extensions);
    state.store.replace_extensions(&hub_id, &entries).await?;

    Ok(Json(json!({ "success": true })))
}

/// GET /api/get-hub-data — PABX-side credentials stored for a hub.
async fn get_hub_data(
    State(state): State<SharedState>,
    Query(q): Query<HubIdQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hub_id = q
        .hub_id
        .ok_or_else(|| ApiError::BadRequest("Hub ID is required".into()))?;

    let data = state
        .store
        .get_hub_data(&hub_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Hub {hub_id}")))?;

    Ok(Json(json!({ "success": true, "data": data })))
}

// =============================================================================
// Helpers
// =============================================================================

/// Keep only entries whose trimmed extension is non-empty.
fn sanitize_extensions(extensions: &HashMap<String, String>) -> Vec<(String, String)> {
    extensions
        .iter()
        .filter_map(|(email, ramal)| {
            let ramal = ramal.trim();
            if ramal.is_empty() {
                None
            } else {
                Some((email.clone(), ramal.to_string()))
            }
        })
        .collect()
}

/// Surrogate hub id for hubs registered without an OAuth flow:
/// `hub_<unix millis>_<9 random base36 chars>`.
fn surrogate_hub_id() -> String {
    const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();

    format!("hub_{}_{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_drops_blank_extensions() {
        let mut extensions = HashMap::new();
        extensions.insert("a@x.com".to_string(), "  ".to_string());
        extensions.insert("b@x.com".to_string(), "101".to_string());

        let entries = sanitize_extensions(&extensions);
        assert_eq!(entries, vec![("b@x.com".to_string(), "101".to_string())]);
    }

    #[test]
    fn test_sanitize_trims_values() {
        let mut extensions = HashMap::new();
        extensions.insert("a@x.com".to_string(), " 204 ".to_string());

        let entries = sanitize_extensions(&extensions);
        assert_eq!(entries, vec![("a@x.com".to_string(), "204".to_string())]);
    }

    #[test]
    fn test_sanitize_empty_map() {
        assert!(sanitize_extensions(&HashMap::new()).is_empty());
    }

    #[test]
    fn test_surrogate_hub_id_shape() {
        let id = surrogate_hub_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "hub");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_surrogate_hub_ids_are_unique() {
        assert_ne!(surrogate_hub_id(), surrogate_hub_id());
    }

    #[test]
    fn test_success_page_mentions_portal_and_return_url() {
        let page = success_page(44455566, Utc::now(), true);
        assert!(page.contains("44455566"));
        assert!(page.contains("https://app.hubspot.com/integrations-settings/44455566/installed"));
        assert!(page.contains("OAuth Response"));
    }
}
