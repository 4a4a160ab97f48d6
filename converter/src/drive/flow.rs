use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    response::Html,
    routing::get,
};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use super::auth::{AuthorizedUser, ClientConfig, DRIVE_SCOPE, request_token};
use super::error::AuthError;

const SUCCESS_PAGE: &str =
    "<p>The authentication flow has completed. You may close this window.</p>";

#[derive(Debug, Deserialize)]
struct Callback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    tx: mpsc::Sender<Callback>,
}

/// Installed-app OAuth flow: a loopback listener receives the redirect
/// carrying the authorization code.
pub struct AuthorizationFlow {
    client: ClientConfig,
    redirect_uri: String,
    state: String,
    url: reqwest::Url,
    callbacks: mpsc::Receiver<Callback>,
    shutdown_tx: watch::Sender<bool>,
    server: tokio::task::JoinHandle<()>,
}

impl AuthorizationFlow {
    /// Bind the loopback listener and build the consent URL.
    pub async fn start(client: ClientConfig) -> Result<Self, AuthError> {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .map_err(|e| AuthError::Flow(format!("bind loopback listener: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::Flow(e.to_string()))?
            .port();

        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = authorization_url(&client, &redirect_uri, &state)?;

        let (tx, callbacks) = mpsc::channel(4);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let app = Router::new()
            .route("/", get(receive_callback))
            .with_state(CallbackState { tx });

        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    while !*shutdown_rx.borrow_and_update() {
                        if shutdown_rx.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "authorization listener failed");
            }
        });

        Ok(Self {
            client,
            redirect_uri,
            state,
            url,
            callbacks,
            shutdown_tx,
            server,
        })
    }

    /// URL the user must open to grant access.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Wait for the redirect, then exchange the code for tokens.
    pub async fn finish(
        mut self,
        http: &reqwest::Client,
        timeout: Duration,
    ) -> Result<AuthorizedUser, AuthError> {
        let code = tokio::time::timeout(timeout, self.next_code())
            .await
            .map_err(|_| AuthError::Flow("timed out waiting for the browser redirect".into()));

        let _ = self.shutdown_tx.send(true);
        let _ = (&mut self.server).await;
        let code = code??;

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
        ];
        let response = request_token(http, &self.client.token_uri, &form).await?;

        if response.refresh_token.is_none() {
            tracing::warn!("token endpoint returned no refresh token; re-run authorize with consent");
        }

        let mut user = AuthorizedUser {
            token: None,
            refresh_token: None,
            token_uri: self.client.token_uri.clone(),
            client_id: self.client.client_id.clone(),
            client_secret: self.client.client_secret.clone(),
            scopes: vec![DRIVE_SCOPE.to_string()],
            expiry: None,
        };
        user.apply(response);
        Ok(user)
    }

    async fn next_code(&mut self) -> Result<String, AuthError> {
        while let Some(callback) = self.callbacks.recv().await {
            if callback.state.as_deref() != Some(self.state.as_str()) {
                tracing::warn!("ignoring redirect with mismatched state");
                continue;
            }
            if let Some(error) = callback.error {
                return Err(AuthError::Flow(format!("consent denied: {error}")));
            }
            if let Some(code) = callback.code {
                return Ok(code);
            }
        }
        Err(AuthError::Flow("listener closed before a code arrived".into()))
    }
}

async fn receive_callback(
    State(state): State<CallbackState>,
    Query(callback): Query<Callback>,
) -> Html<&'static str> {
    let _ = state.tx.send(callback).await;
    Html(SUCCESS_PAGE)
}

fn authorization_url(
    client: &ClientConfig,
    redirect_uri: &str,
    state: &str,
) -> Result<reqwest::Url, AuthError> {
    reqwest::Url::parse_with_params(
        &client.auth_uri,
        &[
            ("response_type", "code"),
            ("client_id", client.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", DRIVE_SCOPE),
            ("state", state),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| AuthError::Flow(format!("invalid auth_uri '{}': {e}", client.auth_uri)))
}
