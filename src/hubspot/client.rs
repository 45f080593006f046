use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;

const DEFAULT_API_BASE: &str = "https://api.hubapi.com";

/// Outbound client for HubSpot's OAuth and settings APIs.
///
/// Token lifetime: 30 minutes for OAuth apps (HubSpot rotates the refresh
/// token only on reinstall, so refresh responses usually omit it).
#[derive(Clone)]
pub struct HubSpotClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    api_base: String,
    http: reqwest::Client,
}

/// A set of tokens returned from HubSpot after code exchange or refresh.
///
/// `hub_id` is only present on some token responses; callers fall back to
/// the account-info endpoints when it is missing.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub hub_id: Option<i64>,
}

impl HubSpotClient {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            api_base: DEFAULT_API_BASE.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Point the client at a different API host. Used by tests.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, ApiError> {
        let resp = self
            .http
            .post(format!("{}/oauth/v1/token", self.api_base))
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("redirect_uri", &self.redirect_uri),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("Token exchange request failed: {e}")))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "HubSpot token exchange failed: {body}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| ApiError::Upstream(format!("Failed to parse token response: {e}")))
    }

    /// Mint a new access token from a refresh token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ApiError> {
        let resp = self
            .http
            .post(format!("{}/oauth/v1/token", self.api_base))
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| ApiError::RefreshFailed(format!("Refresh request failed: {e}")))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::RefreshFailed(format!(
                "HubSpot refresh failed: {body}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| ApiError::RefreshFailed(format!("Failed to parse refresh response: {e}")))
    }

    /// Account details for the authenticated portal.
    ///
    /// The v3 endpoint is not enabled for every app, so a failure falls
    /// back to the legacy `/integrations/v1/me` endpoint before erroring.
    pub async fn account_info(&self, access_token: &str) -> Result<Value, ApiError> {
        match self
            .get_json(&format!("{}/account-info/v3/details", self.api_base), access_token)
            .await
        {
            Ok(v) => Ok(v),
            Err(_) => {
                self.get_json(&format!("{}/integrations/v1/me", self.api_base), access_token)
                    .await
            }
        }
    }

    /// List the portal's users from the settings API.
    pub async fn list_users(&self, access_token: &str) -> Result<Vec<Value>, ApiError> {
        let body = self
            .get_json(&format!("{}/settings/v3/users", self.api_base), access_token)
            .await?;

        let users = body
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(users)
    }

    async fn get_json(&self, url: &str, access_token: &str) -> Result<Value, ApiError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("HubSpot request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "HubSpot returned {status}: {body}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| ApiError::Upstream(format!("Failed to parse HubSpot response: {e}")))
    }
}

/// Scan an account-info payload for a portal id, in a fixed priority order.
/// Accepts numbers and numeric strings; non-numeric values are skipped.
/// Parsing is `parseInt`-lenient: floats truncate and strings only need a
/// leading numeric prefix.
pub fn portal_id_from_account_info(info: &Value) -> Option<i64> {
    const FIELDS: [&str; 6] = ["portalId", "hubId", "portal_id", "hub_id", "accountId", "id"];

    FIELDS.iter().find_map(|field| {
        match info.get(*field)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => parse_int_prefix(s),
            _ => None,
        }
    })
}

/// Leading integer prefix of a string, `Number.parseInt`-style:
/// `" 123abc"` → 123, `"abc"` → none.
fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> HubSpotClient {
        HubSpotClient::new(
            "client-id".into(),
            "client-secret".into(),
            "https://example.com/oauth/callback".into(),
        )
        .with_api_base(server.uri())
    }

    #[tokio::test]
    async fn test_exchange_code_parses_token_set() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v1/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "bearer",
                "access_token": "CJ3v...access",
                "refresh_token": "8a55...refresh",
                "expires_in": 1800,
                "hub_id": 44455566,
            })))
            .mount(&server)
            .await;

        let tokens = test_client(&server).exchange_code("abc123").await.unwrap();
        assert_eq!(tokens.access_token, "CJ3v...access");
        assert_eq!(tokens.refresh_token.as_deref(), Some("8a55...refresh"));
        assert_eq!(tokens.expires_in, 1800);
        assert_eq!(tokens.hub_id, Some(44455566));
    }

    #[tokio::test]
    async fn test_exchange_code_rejected_maps_to_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "BAD_AUTH_CODE",
                "message": "missing or unknown auth code",
            })))
            .mount(&server)
            .await;

        let err = test_client(&server).exchange_code("bogus").await.unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_refresh_token_without_rotation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v1/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "bearer",
                "access_token": "new-access",
                "expires_in": 1800,
            })))
            .mount(&server)
            .await;

        let tokens = test_client(&server).refresh_token("old-refresh").await.unwrap();
        assert_eq!(tokens.access_token, "new-access");
        assert!(tokens.refresh_token.is_none());
        assert!(tokens.hub_id.is_none());
    }

    #[tokio::test]
    async fn test_refresh_failure_maps_to_refresh_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v1/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired grant"))
            .mount(&server)
            .await;

        let err = test_client(&server).refresh_token("dead").await.unwrap_err();
        assert!(matches!(err, ApiError::RefreshFailed(_)));
    }

    #[tokio::test]
    async fn test_account_info_falls_back_to_legacy_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account-info/v3/details"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/integrations/v1/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "portalId": 777888,
            })))
            .mount(&server)
            .await;

        let info = test_client(&server).account_info("tok").await.unwrap();
        assert_eq!(info["portalId"], 777888);
    }

    #[tokio::test]
    async fn test_list_users_unwraps_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/settings/v3/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "id": "1", "email": "a@x.com" },
                    { "id": "2", "email": "b@x.com" },
                ],
            })))
            .mount(&server)
            .await;

        let users = test_client(&server).list_users("tok").await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1]["email"], "b@x.com");
    }

    #[test]
    fn test_portal_id_priority_order() {
        let info = json!({ "id": 1, "accountId": 2, "portalId": 3 });
        assert_eq!(portal_id_from_account_info(&info), Some(3));
    }

    #[test]
    fn test_portal_id_numeric_string() {
        let info = json!({ "hub_id": "9876543" });
        assert_eq!(portal_id_from_account_info(&info), Some(9876543));
    }

    #[test]
    fn test_portal_id_skips_non_numeric() {
        let info = json!({ "portalId": "not-a-number", "accountId": 42 });
        assert_eq!(portal_id_from_account_info(&info), Some(42));
    }

    #[test]
    fn test_portal_id_parses_numeric_prefix() {
        let info = json!({ "portalId": " 123abc" });
        assert_eq!(portal_id_from_account_info(&info), Some(123));
    }

    #[test]
    fn test_portal_id_truncates_float() {
        let info = json!({ "portalId": 44455566.0 });
        assert_eq!(portal_id_from_account_info(&info), Some(44455566));
    }

    #[test]
    fn test_portal_id_absent() {
        assert_eq!(portal_id_from_account_info(&json!({})), None);
    }
}
