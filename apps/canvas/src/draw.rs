use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::auth::SessionToken;
use crate::protocol::DrawRequest;

#[derive(Debug, thiserror::Error)]
pub enum DrawError {
    #[error("draw request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("draw rejected with {status}: {message}")]
    Rejected { status: StatusCode, message: String },
}

impl DrawError {
    /// 401/403: the token needs replacing before retrying.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            DrawError::Rejected { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

/// Places pixels through the HTTP API instead of the socket.
pub struct DrawClient {
    client: Client,
    draw_url: String,
}

impl DrawClient {
    pub fn new(api_base_url: &str) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(client, api_base_url)
    }

    pub fn with_client(client: Client, api_base_url: &str) -> Self {
        Self {
            client,
            draw_url: format!("{}/api/draw", api_base_url.trim_end_matches('/')),
        }
    }

    pub fn draw_url(&self) -> &str {
        &self.draw_url
    }

    /// `POST /api/draw` with `{x, y, color}`. The public token sends no
    /// `Authorization` header.
    pub async fn place(&self, request: &DrawRequest, token: &SessionToken) -> Result<(), DrawError> {
        let mut builder = self.client.post(&self.draw_url).json(request);
        if !token.is_public() {
            builder = builder.bearer_auth(token.as_str());
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DrawError::Rejected {
                status,
                message: message.trim().to_string(),
            });
        }
        debug!(x = request.x, y = request.y, color = request.color, "pixel placed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::{Json, Router, extract::State, routing::post};
    use parking_lot::Mutex;

    type Seen = Arc<Mutex<Vec<(Option<String>, DrawRequest)>>>;

    async fn serve(seen: Seen) -> String {
        async fn draw(
            State(seen): State<Seen>,
            headers: HeaderMap,
            Json(request): Json<DrawRequest>,
        ) -> (AxumStatus, &'static str) {
            let auth = headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let allowed = auth.as_deref() != Some("Bearer revoked");
            seen.lock().push((auth, request));
            if allowed {
                (AxumStatus::OK, "ok")
            } else {
                (AxumStatus::UNAUTHORIZED, "token revoked\n")
            }
        }

        let app = Router::new().route("/api/draw", post(draw)).with_state(seen);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/")
    }

    #[test_timeout::tokio_timeout_test]
    async fn posts_json_with_bearer_header() {
        let seen = Seen::default();
        let client = DrawClient::new(&serve(seen.clone()).await);
        let request = DrawRequest { x: 3, y: 9, color: 5 };

        client.place(&request, &SessionToken::Public).await.unwrap();
        client
            .place(&request, &SessionToken::bearer("abc", None))
            .await
            .unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (None, request));
        assert_eq!(seen[1], (Some("Bearer abc".to_string()), request));
    }

    #[test_timeout::tokio_timeout_test]
    async fn rejection_carries_status_and_body() {
        let client = DrawClient::new(&serve(Seen::default()).await);
        let err = client
            .place(
                &DrawRequest { x: 0, y: 0, color: 1 },
                &SessionToken::bearer("revoked", None),
            )
            .await
            .unwrap_err();
        assert!(err.is_auth_failure());
        match err {
            DrawError::Rejected { status, message } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(message, "token revoked");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn draw_url_strips_trailing_slash() {
        let client = DrawClient::new("https://canvas.example/");
        assert_eq!(client.draw_url(), "https://canvas.example/api/draw");
    }
}
