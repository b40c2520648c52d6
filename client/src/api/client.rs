//! HTTP access to the ERP backend.
//!
//! [`Backend`] is the seam between the session/notification services and the
//! REST API. [`HttpBackend`] is the production implementation: it attaches
//! the stored bearer token to every request and, when the backend answers
//! 401, clears the stored tokens and announces the forced logout.

use crate::api::common::ApiResponse;
use crate::api::models::{Notification, UnreadCount};
use crate::auth::models::{LoginRequest, LoginResponse, RefreshTokenRequest, TokenPair, User};
use crate::config::Config;
use crate::errors::{ClientError, ClientResult};
use crate::repositories::token_repository::TokenStore;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, header::AUTHORIZATION};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Endpoints of the ERP backend consumed by the session core.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse>;

    async fn logout(&self) -> ClientResult<()>;

    /// Exchanges a refresh token for a new token pair.
    async fn refresh_token(&self, refresh_token: &str) -> ClientResult<TokenPair>;

    async fn current_user(&self) -> ClientResult<User>;

    async fn update_current_user(&self, user: &User) -> ClientResult<User>;

    async fn unread_count(&self) -> ClientResult<u64>;

    async fn unread_notifications(&self) -> ClientResult<Vec<Notification>>;

    async fn mark_as_read(&self, id: i64) -> ClientResult<()>;

    async fn mark_all_as_read(&self) -> ClientResult<()>;

    async fn delete_notification(&self, id: i64) -> ClientResult<()>;

    async fn create_test_notification(&self) -> ClientResult<Notification>;
}

/// A request together with the access token attached to it.
struct Outgoing {
    builder: RequestBuilder,
    token: Option<String>,
}

/// reqwest-based [`Backend`].
pub struct HttpBackend {
    http_client: Client,
    base_url: String,
    tokens: Arc<dyn TokenStore>,
    unauthorized_tx: broadcast::Sender<()>,
}

impl HttpBackend {
    pub fn new(config: &Config, tokens: Arc<dyn TokenStore>) -> ClientResult<Self> {
        let http_client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent("erp-client/0.1")
            .build()
            .map_err(|err| ClientError::internal(format!("HTTP client setup failed: {}", err)))?;

        let (unauthorized_tx, _) = broadcast::channel(8);

        Ok(Self {
            http_client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            tokens,
            unauthorized_tx,
        })
    }

    /// Receives one message per 401 answered by the backend on an
    /// authenticated request.
    pub fn subscribe_unauthorized(&self) -> broadcast::Receiver<()> {
        self.unauthorized_tx.subscribe()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> Outgoing {
        let builder = self.http_client.request(method, self.url(path));
        let token = self.tokens.access_token();
        let builder = match &token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        };
        Outgoing { builder, token }
    }

    /// Sends a request and decodes the response envelope.
    ///
    /// When `intercept_unauthorized` is set, a 401 clears the stored tokens
    /// and yields [`ClientError::Unauthorized`]. Credential endpoints turn it
    /// off so that a rejected login surfaces the server's message instead.
    /// A 401 for a token that has since been replaced leaves storage alone.
    async fn send<T: DeserializeOwned>(
        &self,
        request: Outgoing,
        intercept_unauthorized: bool,
    ) -> ClientResult<(StatusCode, ApiResponse<T>)> {
        let response = request.builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED && intercept_unauthorized {
            if self.tokens.access_token() != request.token {
                debug!("Ignoring 401 for a request sent with a replaced token");
                return Err(ClientError::Unauthorized);
            }
            warn!("Backend rejected the session token; clearing stored tokens");
            if let Err(err) = self.tokens.clear() {
                warn!("Failed to clear tokens after 401: {}", err);
            }
            // No receivers simply means nobody is listening for redirects.
            let _ = self.unauthorized_tx.send(());
            return Err(ClientError::Unauthorized);
        }

        let body = response.bytes().await?;
        match serde_json::from_slice::<ApiResponse<T>>(&body) {
            Ok(envelope) => {
                if !status.is_success() && envelope.success {
                    return Err(ClientError::api(
                        status,
                        envelope
                            .message
                            .unwrap_or_else(|| status.to_string()),
                    ));
                }
                Ok((status, envelope))
            }
            Err(err) => {
                debug!("Undecodable response body ({}): {}", status, err);
                if status.is_success() {
                    Err(ClientError::internal(format!(
                        "Unexpected response format: {}",
                        err
                    )))
                } else {
                    Err(ClientError::api(
                        status,
                        status
                            .canonical_reason()
                            .unwrap_or("Request failed")
                            .to_string(),
                    ))
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let (status, envelope) = self.send(self.request(Method::GET, path), true).await?;
        envelope.into_data(status)
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        intercept_unauthorized: bool,
    ) -> ClientResult<T> {
        let mut request = self.request(method, path);
        request.builder = request.builder.json(body);
        let (status, envelope) = self.send(request, intercept_unauthorized).await?;
        envelope.into_data(status)
    }

    async fn send_unit(&self, method: Method, path: &str) -> ClientResult<()> {
        let (status, envelope) = self
            .send::<serde_json::Value>(self.request(method, path), true)
            .await?;
        envelope.into_unit(status)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse> {
        self.send_json(Method::POST, "/auth/login", request, false)
            .await
    }

    async fn logout(&self) -> ClientResult<()> {
        let mut request = self.request(Method::POST, "/auth/logout");
        request.builder = request.builder.json(&json!({}));
        let (status, envelope) = self.send::<serde_json::Value>(request, false).await?;
        envelope.into_unit(status)
    }

    async fn refresh_token(&self, refresh_token: &str) -> ClientResult<TokenPair> {
        let request = RefreshTokenRequest {
            refresh_token: refresh_token.to_string(),
        };
        // The refresh call must not carry a possibly expired access token.
        let outgoing = Outgoing {
            builder: self.http_client.post(self.url("/auth/refresh")).json(&request),
            token: None,
        };
        let (status, envelope) = self.send(outgoing, false).await?;
        envelope.into_data(status)
    }

    async fn current_user(&self) -> ClientResult<User> {
        self.get("/auth/me").await
    }

    async fn update_current_user(&self, user: &User) -> ClientResult<User> {
        self.send_json(Method::PUT, "/auth/me", user, true).await
    }

    async fn unread_count(&self) -> ClientResult<u64> {
        let count: UnreadCount = self.get("/notifications/unread/count").await?;
        Ok(count.count)
    }

    async fn unread_notifications(&self) -> ClientResult<Vec<Notification>> {
        self.get("/notifications/unread").await
    }

    async fn mark_as_read(&self, id: i64) -> ClientResult<()> {
        self.send_unit(Method::PUT, &format!("/notifications/{}/read", id))
            .await
    }

    async fn mark_all_as_read(&self) -> ClientResult<()> {
        self.send_unit(Method::PUT, "/notifications/read-all").await
    }

    async fn delete_notification(&self, id: i64) -> ClientResult<()> {
        self.send_unit(Method::DELETE, &format!("/notifications/{}", id))
            .await
    }

    async fn create_test_notification(&self) -> ClientResult<Notification> {
        self.send_json(Method::POST, "/notifications/test", &json!({}), true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::token_repository::{MemoryTokenStore, StoredTokens};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serves a single HTTP exchange on a loopback port. The request head is
    /// reported through the first receiver; the canned response is written
    /// once the returned sender fires (or is dropped).
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let (head_tx, head_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            let head_end = loop {
                if let Some(pos) = received
                    .windows(4)
                    .position(|window| window == b"\r\n\r\n")
                {
                    break pos + 4;
                }
                let read = socket.read(&mut buf).await.unwrap();
                assert!(read > 0, "connection closed before the request head");
                received.extend_from_slice(&buf[..read]);
            };
            let head = String::from_utf8_lossy(&received[..head_end]).into_owned();
            let content_length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while received.len() < head_end + content_length {
                let read = socket.read(&mut buf).await.unwrap();
                if read == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..read]);
            }
            let _ = head_tx.send(head);
            let _ = release_rx.await;

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        (base_url, head_rx, release_tx)
    }

    fn signed_in_store() -> Arc<MemoryTokenStore> {
        Arc::new(MemoryTokenStore::with_tokens(StoredTokens {
            access_token: Some("access-1".to_string()),
            refresh_token: Some("refresh-1".to_string()),
        }))
    }

    fn backend_at(base_url: String, tokens: Arc<MemoryTokenStore>) -> HttpBackend {
        let config = Config {
            api_base_url: base_url,
            http_timeout_seconds: 5,
            ..Config::default()
        };
        HttpBackend::new(&config, tokens).unwrap()
    }

    #[test]
    fn urls_carry_api_prefix() {
        let config = Config {
            api_base_url: "https://erp.example.com/".to_string(),
            ..Config::default()
        };
        let backend = HttpBackend::new(&config, Arc::new(MemoryTokenStore::new())).unwrap();

        assert_eq!(
            backend.url("/notifications/unread/count"),
            "https://erp.example.com/api/notifications/unread/count"
        );
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let config = Config {
            api_base_url: "http://127.0.0.1:1".to_string(),
            http_timeout_seconds: 2,
            ..Config::default()
        };
        let backend = HttpBackend::new(&config, Arc::new(MemoryTokenStore::new())).unwrap();

        let err = backend.unread_count().await.unwrap_err();
        assert!(matches!(err, ClientError::Network { .. }));
    }

    #[tokio::test]
    async fn unauthorized_response_clears_tokens_and_broadcasts() {
        let (base_url, head, release) =
            serve_once("401 Unauthorized", r#"{"success":false,"message":"Token expired"}"#).await;
        release.send(()).unwrap();
        let tokens = signed_in_store();
        let backend = backend_at(base_url, tokens.clone());
        let mut unauthorized = backend.subscribe_unauthorized();

        let err = backend.unread_count().await.unwrap_err();

        assert!(matches!(err, ClientError::Unauthorized));
        assert!(tokens.load().unwrap().is_empty());
        assert!(unauthorized.try_recv().is_ok());

        let head = head.await.unwrap();
        assert!(head.starts_with("GET /api/notifications/unread/count "));
        assert!(
            head.to_ascii_lowercase()
                .contains("authorization: bearer access-1")
        );
    }

    #[tokio::test]
    async fn rejected_login_keeps_tokens_and_surfaces_message() {
        let (base_url, _head, release) = serve_once(
            "401 Unauthorized",
            r#"{"success":false,"message":"Invalid username or password"}"#,
        )
        .await;
        release.send(()).unwrap();
        let tokens = signed_in_store();
        let backend = backend_at(base_url, tokens.clone());
        let mut unauthorized = backend.subscribe_unauthorized();

        let err = backend
            .login(&LoginRequest::new("jdoe", "wrong"))
            .await
            .unwrap_err();

        assert_eq!(err.user_message(), "Invalid username or password");
        assert!(!tokens.load().unwrap().is_empty());
        assert!(unauthorized.try_recv().is_err());
    }

    #[tokio::test]
    async fn unauthorized_for_a_replaced_token_keeps_the_new_session() {
        let (base_url, head, release) =
            serve_once("401 Unauthorized", r#"{"success":false,"message":"Token expired"}"#).await;
        let tokens = signed_in_store();
        let backend = Arc::new(backend_at(base_url, tokens.clone()));
        let mut unauthorized = backend.subscribe_unauthorized();

        let pending = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.unread_count().await })
        };
        head.await.unwrap();
        tokens
            .save(&TokenPair {
                access_token: "access-2".to_string(),
                refresh_token: "refresh-2".to_string(),
            })
            .unwrap();
        release.send(()).unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized));
        assert_eq!(tokens.access_token().as_deref(), Some("access-2"));
        assert!(unauthorized.try_recv().is_err());
    }
}
