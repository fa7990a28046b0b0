// hearth_exporter - Prometheus metrics exporter for smart home thermostats and local weather
//
// Copyright 2023 The hearth_exporter Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::collector::CollectorError;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, RefreshToken, Scope, TokenResponse, TokenUrl};
use reqwest::header::{ACCEPT, AUTHORIZATION, LOCATION, USER_AGENT};
use reqwest::{redirect, Client, Response, StatusCode, Url};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Upper bound on requests sent while following redirects for one logical call.
pub const MAX_REDIRECTS: usize = 10;

/// Everything needed to exchange a long-lived refresh token for access
/// tokens: client credentials, the scope to request, and the provider
/// endpoints. The token URL is configurable so tests can point it at a
/// local server.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub scope: String,
    pub auth_url: String,
    pub token_url: String,
}

#[derive(Debug)]
struct CachedToken {
    secret: String,
    expires_at: Instant,
}

/// Lazily exchanges a refresh token for access tokens, caching each access
/// token until shortly before its advertised expiry.
#[derive(Debug)]
pub struct OAuthFlow {
    client: BasicClient,
    refresh_token: RefreshToken,
    scope: Scope,
    cache: Mutex<Option<CachedToken>>,
}

impl OAuthFlow {
    const EXPIRY_MARGIN: Duration = Duration::from_secs(30);
    const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn new(cfg: OAuthConfig) -> Result<Self, CollectorError> {
        let auth_url = AuthUrl::new(cfg.auth_url.clone()).map_err(|_| CollectorError::InvalidEndpoint(cfg.auth_url))?;
        let token_url =
            TokenUrl::new(cfg.token_url.clone()).map_err(|_| CollectorError::InvalidEndpoint(cfg.token_url))?;

        Ok(OAuthFlow {
            client: BasicClient::new(
                ClientId::new(cfg.client_id),
                Some(ClientSecret::new(cfg.client_secret)),
                auth_url,
                Some(token_url),
            ),
            refresh_token: RefreshToken::new(cfg.refresh_token),
            scope: Scope::new(cfg.scope),
            cache: Mutex::new(None),
        })
    }

    /// Return a usable access token, running the refresh exchange over the
    /// provided client if the cached token is missing or about to expire.
    /// The cache lock is held for the duration of an exchange so concurrent
    /// callers trigger at most one.
    async fn access_token(&self, client: &Client) -> Result<String, CollectorError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.secret.clone());
            }
        }

        tracing::debug!(message = "exchanging refresh token for access token");
        let http = client.clone();
        let response = self
            .client
            .exchange_refresh_token(&self.refresh_token)
            .add_scope(self.scope.clone())
            .request_async(move |request| proxy_request(http, request))
            .await
            .map_err(|e| CollectorError::TokenRefresh(e.to_string()))?;

        let secret = response.access_token().secret().clone();
        let ttl = response.expires_in().unwrap_or(Self::DEFAULT_TTL);
        *cache = Some(CachedToken {
            secret: secret.clone(),
            expires_at: Instant::now() + ttl.saturating_sub(Self::EXPIRY_MARGIN),
        });

        Ok(secret)
    }

    async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }
}

/// Where bearer tokens for API requests come from: a fixed token supplied
/// in configuration, or an OAuth refresh flow run on demand.
#[derive(Debug)]
pub enum TokenSource {
    Static(String),
    OAuth(OAuthFlow),
}

impl TokenSource {
    async fn bearer(&self, client: &Client) -> Result<String, CollectorError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::OAuth(flow) => flow.access_token(client).await,
        }
    }

    fn refreshable(&self) -> bool {
        matches!(self, Self::OAuth(_))
    }

    async fn invalidate(&self) {
        if let Self::OAuth(flow) = self {
            flow.invalidate().await;
        }
    }
}

/// HTTP transport that attaches a bearer token to every request and follows
/// redirects itself so the Authorization header survives each hop. Standard
/// clients drop credentials when redirected to another host, which breaks
/// APIs that bounce callers to per-account subdomains.
#[derive(Debug)]
pub struct AuthTransport {
    client: Client,
    tokens: TokenSource,
}

impl AuthTransport {
    const USER_AGENT: &'static str = "Hearth Prometheus Exporter (https://github.com/hearthlabs/hearth_exporter)";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(timeout: Duration, tokens: TokenSource) -> Result<Self, CollectorError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(CollectorError::Request)?;

        Ok(AuthTransport { client, tokens })
    }

    /// Perform an authenticated GET and return the response body. A 401 with
    /// an OAuth token source invalidates the cached access token and retries
    /// exactly once with a fresh one.
    pub async fn get_json(&self, url: &Url) -> Result<String, CollectorError> {
        let token = self.tokens.bearer(&self.client).await?;
        let res = self.follow_redirects(url, &token).await?;

        if res.status() == StatusCode::UNAUTHORIZED && self.tokens.refreshable() {
            tracing::debug!(message = "request unauthorized, retrying with fresh access token", url = %url);
            self.tokens.invalidate().await;
            let token = self.tokens.bearer(&self.client).await?;
            let res = self.follow_redirects(url, &token).await?;
            return self.read_body(res).await;
        }

        self.read_body(res).await
    }

    async fn follow_redirects(&self, url: &Url, token: &str) -> Result<Response, CollectorError> {
        let mut url = url.clone();

        for _ in 0..MAX_REDIRECTS {
            tracing::debug!(message = "making API request", url = %url);
            let res = self
                .client
                .get(url.clone())
                .header(USER_AGENT, Self::USER_AGENT)
                .header(ACCEPT, Self::JSON_RESPONSE)
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .send()
                .await
                .map_err(CollectorError::Request)?;

            let status = res.status();
            if !status.is_redirection() {
                return Ok(res);
            }

            let location = res
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| CollectorError::UnexpectedStatus(status, url.clone()))?;
            url = url
                .join(location)
                .map_err(|_| CollectorError::UnexpectedStatus(status, url.clone()))?;
        }

        Err(CollectorError::Redirect(url))
    }

    async fn read_body(&self, res: Response) -> Result<String, CollectorError> {
        let status = res.status();
        if status != StatusCode::OK {
            return Err(CollectorError::UnexpectedStatus(status, res.url().clone()));
        }

        res.text().await.map_err(CollectorError::Request)
    }
}

/// Run one OAuth exchange request through our own reqwest client so the
/// exchange inherits the configured timeout.
async fn proxy_request(client: Client, request: oauth2::HttpRequest) -> Result<oauth2::HttpResponse, reqwest::Error> {
    let mut builder = client.request(request.method, request.url).body(request.body);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }

    let response = builder.send().await?;
    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(oauth2::HttpResponse {
        status_code,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::{AuthTransport, OAuthConfig, OAuthFlow, TokenSource, MAX_REDIRECTS};
    use crate::collector::ErrorKind;
    use reqwest::Url;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn static_transport(token: &str) -> AuthTransport {
        AuthTransport::new(TIMEOUT, TokenSource::Static(token.to_owned())).unwrap()
    }

    fn oauth_transport(token_url: &str) -> AuthTransport {
        let flow = OAuthFlow::new(OAuthConfig {
            client_id: "client-id".to_owned(),
            client_secret: "client-secret".to_owned(),
            refresh_token: "refresh-token".to_owned(),
            scope: "https://example.com/auth/devices".to_owned(),
            auth_url: "https://example.com/o/auth".to_owned(),
            token_url: token_url.to_owned(),
        })
        .unwrap();

        AuthTransport::new(TIMEOUT, TokenSource::OAuth(flow)).unwrap()
    }

    fn token_response(secret: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": secret,
            "token_type": "bearer",
            "expires_in": 3600,
        }))
    }

    fn api_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/devices", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_get_json_static_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devices"))
            .and(header("authorization", "Bearer static-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let transport = static_transport("static-token");
        let body = transport.get_json(&api_url(&server)).await.unwrap();

        assert_eq!("{}", body);
    }

    #[tokio::test]
    async fn test_get_json_authorization_preserved_across_hosts() {
        let upstream = MockServer::start().await;
        let target = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/devices"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", format!("{}/moved", target.uri()).as_str()),
            )
            .mount(&upstream)
            .await;
        Mock::given(method("GET"))
            .and(path("/moved"))
            .and(header("authorization", "Bearer static-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&target)
            .await;

        let transport = static_transport("static-token");
        let body = transport.get_json(&api_url(&upstream)).await.unwrap();

        assert_eq!("ok", body);
    }

    #[tokio::test]
    async fn test_get_json_relative_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devices"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/v2/devices"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/devices"))
            .and(header("authorization", "Bearer static-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let transport = static_transport("static-token");
        let body = transport.get_json(&api_url(&server)).await.unwrap();

        assert_eq!("moved", body);
    }

    #[tokio::test]
    async fn test_get_json_redirect_loop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/devices"))
            .mount(&server)
            .await;

        let transport = static_transport("static-token");
        let err = transport.get_json(&api_url(&server)).await.unwrap_err();

        assert_eq!(ErrorKind::Transport, err.kind());
        assert!(err.to_string().contains("stopped after 10 redirects"));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(MAX_REDIRECTS, requests.len());
    }

    #[tokio::test]
    async fn test_get_json_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let transport = static_transport("static-token");
        let err = transport.get_json(&api_url(&server)).await.unwrap_err();

        assert_eq!(ErrorKind::Status, err.kind());
    }

    #[tokio::test]
    async fn test_get_json_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = AuthTransport::new(Duration::from_millis(50), TokenSource::Static("t".to_owned())).unwrap();
        let err = transport.get_json(&api_url(&server)).await.unwrap_err();

        assert_eq!(ErrorKind::Transport, err.kind());
    }

    #[tokio::test]
    async fn test_get_json_static_token_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let transport = static_transport("static-token");
        let err = transport.get_json(&api_url(&server)).await.unwrap_err();

        assert_eq!(ErrorKind::Status, err.kind());
        let requests = server.received_requests().await.unwrap();
        assert_eq!(1, requests.len());
    }

    #[tokio::test]
    async fn test_oauth_token_attached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(token_response("fresh-token"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/devices"))
            .and(header("authorization", "Bearer fresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let transport = oauth_transport(&format!("{}/token", server.uri()));
        let body = transport.get_json(&api_url(&server)).await.unwrap();

        assert_eq!("{}", body);
    }

    #[tokio::test]
    async fn test_oauth_token_cached_across_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(token_response("fresh-token"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/devices"))
            .and(header("authorization", "Bearer fresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let transport = oauth_transport(&format!("{}/token", server.uri()));
        transport.get_json(&api_url(&server)).await.unwrap();
        transport.get_json(&api_url(&server)).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let exchanges = requests.iter().filter(|r| r.url.path() == "/token").count();
        assert_eq!(1, exchanges);
    }

    #[tokio::test]
    async fn test_oauth_retry_on_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(token_response("stale-token"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(token_response("fresh-token"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/devices"))
            .and(header("authorization", "Bearer stale-token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/devices"))
            .and(header("authorization", "Bearer fresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let transport = oauth_transport(&format!("{}/token", server.uri()));
        let body = transport.get_json(&api_url(&server)).await.unwrap();

        assert_eq!("recovered", body);
        let requests = server.received_requests().await.unwrap();
        let exchanges = requests.iter().filter(|r| r.url.path() == "/token").count();
        assert_eq!(2, exchanges);
    }

    #[tokio::test]
    async fn test_oauth_exchange_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transport = oauth_transport(&format!("{}/token", server.uri()));
        let err = transport.get_json(&api_url(&server)).await.unwrap_err();

        assert_eq!(ErrorKind::Transport, err.kind());
        assert!(err.to_string().contains("token refresh failed"));
    }
}
