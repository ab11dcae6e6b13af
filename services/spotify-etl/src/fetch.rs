//!
//! src/fetch.rs
//!
//! Defines methods for hitting the Spotify accounts and Web API
//! endpoints the job needs. Nothing here retries, a failed call
//! fails the run and the scheduler decides what happens next.
//!

use reqwest::{Client, header, redirect, RequestBuilder, Response, StatusCode};
use url::Url;
use crate::config::{HttpConfig, SpotifyConfig};
use crate::types::{PlaybackEvent, RecentlyPlayedPage, TokenResponse, Track};
use crate::errors::EtlError;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder  {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, EtlError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_helper(http)
        .default_headers(h)
        .build()
        .map_err(|e| EtlError::Http(format!("build client: {e}")))
}

/// Maps a non-success Web API response onto the upstream error variants
async fn upstream_error(resp: Response) -> EtlError {
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp.headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        return EtlError::RateLimited(retry_after);
    }
    let body = resp.text().await.unwrap_or_default();
    EtlError::Upstream { status: status.as_u16(), body }
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, EtlError> {

        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone()
        })
    }

    /// POST /api/token with the app's basic credentials
    pub fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
    }

    async fn exchange(&self, form: &[(&str, &str)]) -> Result<TokenResponse, EtlError> {
        if self.cfg.client_id.is_empty() || self.cfg.client_secret.is_empty() {
            return Err(EtlError::Config("client credentials are empty".to_string()));
        }

        let resp = self.token_request().form(form).send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(EtlError::AuthRefresh { status: status.as_u16(), body });
        }

        let token: TokenResponse = resp.json().await
            .map_err(|e| EtlError::Parse(format!("token response: {e}")))?;
        Ok(token)
    }

    /// Trades the long-lived refresh token for a fresh access token
    pub async fn refresh_access_token(&self) -> Result<TokenResponse, EtlError> {
        let refresh_token = self.cfg.refresh_token.as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EtlError::Config("refresh token is empty".to_string()))?;

        let token = self.exchange(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ]).await?;
        tracing::debug!(expires_in = ?token.expires_in, scope = ?token.scope, "token.refreshed");
        Ok(token)
    }

    /// App-only token, enough for catalog lookups
    pub async fn client_credentials_token(&self) -> Result<TokenResponse, EtlError> {
        self.exchange(&[("grant_type", "client_credentials")]).await
    }

    /// Completes the authorization-code flow, the response carries the refresh token
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, EtlError> {
        self.exchange(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.cfg.redirect_uri.as_str()),
        ]).await
    }

    /// GET /authorize?client_id=&response_type=code&redirect_uri=&scope=
    pub fn authorize_url(&self) -> Url {
        let mut url = self.cfg.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.cfg.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.cfg.redirect_uri.as_str())
            .append_pair("scope", &self.cfg.scope);
        url
    }

    fn endpoint(&self, rel: &str) -> Result<Url, EtlError> {
        self.cfg.api_base.join(rel)
            .map_err(|e| EtlError::Config(format!("join {rel}: {e}")))
    }

    /// GET /v1/me/player/recently-played?limit=
    pub fn recently_played(&self, limit: u32, bearer: &str) ->
        Result<RequestBuilder, EtlError> {
        let url = self.endpoint("me/player/recently-played")?;
        Ok( self.http.get(url).bearer_auth(bearer).query(&[("limit", limit)]) )
    }

    /// GET /v1/tracks/{id}
    pub fn track(&self, track_id: &str, bearer: &str) -> Result<RequestBuilder, EtlError> {
        let url = self.endpoint(&format!("tracks/{track_id}"))?;
        Ok( self.http.get(url).bearer_auth(bearer) )
    }

    /// Most recent plays first, exactly as upstream orders them
    pub async fn fetch_recently_played(&self, limit: u32, bearer: &str) ->
        Result<Vec<PlaybackEvent>, EtlError> {
        let resp = self.recently_played(limit, bearer)?.send().await?;
        if !resp.status().is_success() {
            return Err(upstream_error(resp).await);
        }

        let page: RecentlyPlayedPage = resp.json().await
            .map_err(|e| EtlError::Parse(format!("recently played: {e}")))?;
        let has_next = page.next.is_some();
        let items = page.items.unwrap_or_default();
        tracing::debug!(limit, received = items.len(), has_next, "history.fetched");
        Ok(items)
    }

    pub async fn fetch_track(&self, track_id: &str, bearer: &str) -> Result<Track, EtlError> {
        let resp = self.track(track_id, bearer)?.send().await?;
        if !resp.status().is_success() {
            return Err(upstream_error(resp).await);
        }
        resp.json::<Track>().await
            .map_err(|e| EtlError::Parse(format!("track {track_id}: {e}")))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // base64("client-id:client-secret")
    pub(crate) const BASIC: &str = "Basic Y2xpZW50LWlkOmNsaWVudC1zZWNyZXQ=";

    pub(crate) fn spotify_config(server: &MockServer) -> SpotifyConfig {
        let base = Url::parse(&server.uri()).unwrap();
        SpotifyConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: Url::parse("http://localhost:8888/callback").unwrap(),
            scope: "user-read-recently-played".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            token_url: base.join("api/token").unwrap(),
            authorize_url: base.join("authorize").unwrap(),
            api_base: base.join("v1/").unwrap(),
        }
    }

    pub(crate) fn client(server: &MockServer) -> SpotifyClient {
        SpotifyClient::new(&HttpConfig::default(), &spotify_config(server)).unwrap()
    }

    pub(crate) async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(header("authorization", BASIC))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-token",
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": "user-read-recently-played"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn refresh_sends_basic_auth_and_form() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        let token = client(&server).refresh_access_token().await.unwrap();
        assert_eq!(token.access_token, "access-token");
        assert_eq!(token.expires_in, Some(3600));
    }

    #[tokio::test]
    async fn refresh_failure_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(400)
                .set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        match client(&server).refresh_access_token().await {
            Err(EtlError::AuthRefresh { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            },
            other => panic!("expected auth refresh error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_refresh_token_never_hits_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut cfg = spotify_config(&server);
        cfg.refresh_token = Some(String::new());
        let spotify = SpotifyClient::new(&HttpConfig::default(), &cfg).unwrap();

        assert!(matches!(
            spotify.refresh_access_token().await,
            Err(EtlError::Config(_))
        ));
    }

    #[tokio::test]
    async fn recently_played_uses_bearer_and_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/recently-played"))
            .and(query_param("limit", "7"))
            .and(header("authorization", "Bearer access-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [],
                "next": null,
                "limit": 7
            })))
            .expect(1)
            .mount(&server)
            .await;

        let items = client(&server)
            .fetch_recently_played(7, "access-token")
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn recently_played_propagates_upstream_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/recently-played"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .mount(&server)
            .await;

        match client(&server).fetch_recently_played(5, "stale").await {
            Err(EtlError::Upstream { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "expired");
            },
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_keeps_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/recently-played"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
            .mount(&server)
            .await;

        match client(&server).fetch_recently_played(5, "token").await {
            Err(EtlError::RateLimited(retry)) => assert_eq!(retry.as_deref(), Some("30")),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exchange_code_posts_redirect_uri() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(header("authorization", BASIC))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("redirect_uri=http%3A%2F%2Flocalhost%3A8888%2Fcallback"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a",
                "refresh_token": "long-lived"
            })))
            .mount(&server)
            .await;

        let token = client(&server).exchange_code("abc").await.unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("long-lived"));
    }

    #[tokio::test]
    async fn authorize_url_carries_app_settings() {
        let server = MockServer::start().await;
        let url = client(&server).authorize_url();
        let pairs: Vec<(String, String)> = url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(url.path().ends_with("/authorize"));
        assert!(pairs.contains(&("client_id".into(), "client-id".into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
        assert!(pairs.contains(&("scope".into(), "user-read-recently-played".into())));
        assert!(pairs.contains(&(
            "redirect_uri".into(), "http://localhost:8888/callback".into()
        )));
    }
}
