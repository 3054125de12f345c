use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::header::AUTHORIZATION;

use crate::auth::token::TokenService;
use crate::error::{AppError, AppResult};

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_FACTOR: f64 = 2.5;
const BACKOFF_CAP: Duration = Duration::from_secs(1);

/// Response headers that describe framing of the upstream connection rather
/// than the payload itself — never forwarded to the caller, since this
/// proxy's own HTTP stack re-frames the response independently (section 4.7).
const HOP_BY_HOP_HEADERS: &[&str] = [
    "content-length",
    "transfer-encoding",
    "connection",
    "content-encoding",
]
.as_slice();

pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Forwards requests to an in-network PostgREST instance over a pooled
/// keep-alive transport (C7), with retry on transient network errors and
/// optional API-key-to-admin-JWT upgrade.
pub struct PostgrestProxy {
    client: reqwest::Client,
    base_url: String,
    api_keys: Vec<String>,
    tokens: TokenService,
}

impl PostgrestProxy {
    pub fn new(base_url: String, api_keys: Vec<String>, tokens: TokenService) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(20)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build PostgREST HTTP client");

        Self {
            client,
            base_url,
            api_keys,
            tokens,
        }
    }

    /// Forwards a single request, retrying up to [`MAX_RETRIES`] times on
    /// network-level failures (connection refused, DNS failure, timeout)
    /// with exponential backoff. An HTTP response — even a 4xx/5xx one — is
    /// never retried; it is returned to the caller as-is.
    pub async fn forward(&self, mut req: ProxyRequest) -> AppResult<ProxyResponse> {
        self.maybe_upgrade_authorization(&mut req.headers)?;

        let url = match &req.query {
            Some(q) if !q.is_empty() => format!(
                "{}{}?{}",
                self.base_url.trim_end_matches('/'),
                req.path,
                q
            ),
            _ => format!("{}{}", self.base_url.trim_end_matches('/'), req.path),
        };

        let mut attempt = 0u32;
        loop {
            let outgoing = self
                .client
                .request(req.method.clone(), &url)
                .headers(req.headers.clone())
                .body(req.body.clone());

            match outgoing.send().await {
                Ok(resp) => return Ok(Self::into_proxy_response(resp).await?),
                Err(e) if Self::is_transient(&e) && attempt + 1 < MAX_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(Self::backoff(attempt)).await;
                }
                Err(e) if Self::is_transient(&e) => {
                    return Err(AppError::ServiceUnavailable(format!(
                        "PostgREST unreachable after {MAX_RETRIES} attempts: {e}"
                    )));
                }
                Err(e) => {
                    return Err(AppError::ServiceUnavailable(format!(
                        "PostgREST request failed: {e}"
                    )));
                }
            }
        }
    }

    fn is_transient(e: &reqwest::Error) -> bool {
        e.is_connect() || e.is_timeout()
    }

    fn backoff(attempt: u32) -> Duration {
        let millis = (BACKOFF_BASE_MS as f64) * BACKOFF_FACTOR.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(BACKOFF_CAP)
    }

    /// If the client presented a valid API key, swap `Authorization` for a
    /// freshly-minted admin JWT before forwarding — PostgREST itself only
    /// understands JWTs, never raw API keys (section 4.7).
    fn maybe_upgrade_authorization(&self, headers: &mut HeaderMap) -> AppResult<()> {
        let Some(presented) = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
        else {
            return Ok(());
        };

        if !self.api_keys.iter().any(|k| k == &presented) {
            return Ok(());
        }

        let admin_jwt = self.tokens.issue_admin()?;
        let value = HeaderValue::from_str(&format!("Bearer {admin_jwt}"))
            .map_err(|_| AppError::Internal)?;
        headers.insert(AUTHORIZATION, value);
        headers.remove("x-api-key");
        Ok(())
    }

    async fn into_proxy_response(resp: reqwest::Response) -> AppResult<ProxyResponse> {
        let status = resp.status();
        let mut headers = HeaderMap::new();
        for (name, value) in resp.headers() {
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if let Ok(header_name) = HeaderName::from_bytes(name.as_str().as_bytes()) {
                headers.insert(header_name, value.clone());
            }
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("failed reading PostgREST body: {e}")))?
            .to_vec();

        Ok(ProxyResponse {
            status: StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps_at_one_second() {
        let b0 = PostgrestProxy::backoff(0);
        let b1 = PostgrestProxy::backoff(1);
        let b2 = PostgrestProxy::backoff(2);
        assert_eq!(b0, Duration::from_millis(200));
        assert_eq!(b1, Duration::from_millis(500));
        assert!(b1 > b0);
        assert!(b2 >= b1);
        assert!(PostgrestProxy::backoff(10) <= BACKOFF_CAP);
    }

    #[test]
    fn hop_by_hop_headers_cover_the_spec_list() {
        for expected in ["content-length", "transfer-encoding", "connection", "content-encoding"] {
            assert!(HOP_BY_HOP_HEADERS.contains(&expected));
        }
    }
}
