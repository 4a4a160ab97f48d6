use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::error::AuthError;
use crate::util::time;

/// Full Drive access; needed to read arbitrary shared files and write into folders.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW: TimeDelta = TimeDelta::seconds(60);

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Stored user credentials (`token.json`), in the layout Google's client
/// libraries read and write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizedUser {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, with = "expiry_format")]
    pub expiry: Option<DateTime<Utc>>,
}

impl AuthorizedUser {
    /// A token is usable if present and not within the skew of its expiry.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.expiry) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(expiry)) => now + EXPIRY_SKEW < expiry,
        }
    }

    pub(crate) fn apply(&mut self, response: TokenResponse) {
        self.expiry = response.expires_in.and_then(time::expires_in);
        self.token = Some(response.access_token);
        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if let Some(scope) = response.scope {
            self.scopes = scope.split_whitespace().map(str::to_string).collect();
        }
    }

    pub async fn load(path: &Path) -> Result<Option<Self>, AuthError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AuthError::InvalidFile {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuthError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), AuthError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| AuthError::InvalidFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        tokio::fs::write(path, json).await.map_err(|e| AuthError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

mod expiry_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::util::time;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&time::format_expiry(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => time::parse_expiry(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid expiry '{s}'"))),
        }
    }
}

/// OAuth client configuration from a downloaded client secrets file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// `credentials.json`: either a desktop (`installed`) or `web` client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    installed: Option<ClientConfig>,
    web: Option<ClientConfig>,
}

impl ClientSecrets {
    pub async fn load(path: &Path) -> Result<ClientConfig, AuthError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::MissingCredentials(path.to_path_buf()));
            }
            Err(e) => {
                return Err(AuthError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        let secrets: Self = serde_json::from_slice(&bytes).map_err(|e| AuthError::InvalidFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        secrets
            .installed
            .or(secrets.web)
            .ok_or_else(|| AuthError::InvalidFile {
                path: path.to_path_buf(),
                message: "expected an 'installed' or 'web' client".to_string(),
            })
    }
}

/// Successful response from the OAuth token endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// POST a form to a token endpoint and decode the token response.
pub(crate) async fn request_token(
    http: &reqwest::Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, AuthError> {
    let response = http.post(token_uri).form(form).send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(err) => match err.error_description {
                Some(description) => format!("{}: {}", err.error, description),
                None => err.error,
            },
            Err(_) => format!("HTTP {status}"),
        };
        return Err(AuthError::TokenEndpoint(message));
    }

    Ok(response.json().await?)
}

/// Hands out Drive access tokens, refreshing and persisting `token.json` as
/// needed. Concurrent callers share one refresh.
pub struct Authenticator {
    http: reqwest::Client,
    credentials_path: PathBuf,
    token_path: PathBuf,
    user: Mutex<Option<AuthorizedUser>>,
}

impl Authenticator {
    pub fn new(http: reqwest::Client, credentials_path: PathBuf, token_path: PathBuf) -> Self {
        Self {
            http,
            credentials_path,
            token_path,
            user: Mutex::new(None),
        }
    }

    /// Return a valid access token.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut guard = self.user.lock().await;

        if guard.is_none() {
            *guard = AuthorizedUser::load(&self.token_path).await?;
        }
        let Some(user) = guard.as_mut() else {
            return Err(self.missing_token().await);
        };

        if user.is_valid(time::now()) {
            if let Some(token) = &user.token {
                return Ok(token.clone());
            }
        }

        let Some(refresh_token) = user.refresh_token.clone() else {
            *guard = None;
            return Err(AuthError::Reauthorize(
                "token expired and no refresh token is stored".to_string(),
            ));
        };

        tracing::info!("refreshing drive access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", user.client_id.as_str()),
            ("client_secret", user.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        match request_token(&self.http, &user.token_uri, &form).await {
            Ok(response) => {
                user.apply(response);
                user.save(&self.token_path).await?;
                user.token
                    .clone()
                    .ok_or_else(|| AuthError::TokenEndpoint("no access token returned".to_string()))
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %self.token_path.display(), "refresh failed, removing stale token");
                *guard = None;
                if let Err(remove_err) = tokio::fs::remove_file(&self.token_path).await {
                    tracing::warn!(error = %remove_err, "could not remove stale token");
                }
                Err(AuthError::Reauthorize(e.to_string()))
            }
        }
    }

    async fn missing_token(&self) -> AuthError {
        match tokio::fs::try_exists(&self.credentials_path).await {
            Ok(true) => AuthError::NotAuthorized(self.token_path.clone()),
            _ => AuthError::MissingCredentials(self.credentials_path.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDrive, test_http, write_token};

    #[test]
    fn reads_google_token_layout() {
        let json = r#"{
            "token": "ya29.a0",
            "refresh_token": "1//0g",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "id.apps.googleusercontent.com",
            "client_secret": "secret",
            "scopes": ["https://www.googleapis.com/auth/drive"],
            "universe_domain": "googleapis.com",
            "account": "",
            "expiry": "2026-02-08T05:00:00.123456Z"
        }"#;
        let user: AuthorizedUser = serde_json::from_str(json).unwrap();
        assert_eq!(user.token.as_deref(), Some("ya29.a0"));
        assert_eq!(user.expiry.unwrap().timestamp(), 1770526800);

        let now = user.expiry.unwrap() - TimeDelta::minutes(5);
        assert!(user.is_valid(now));
        assert!(!user.is_valid(user.expiry.unwrap() - TimeDelta::seconds(30)));
    }

    #[test]
    fn token_without_expiry_is_valid() {
        let user: AuthorizedUser =
            serde_json::from_str(r#"{"token":"t","client_id":"c","client_secret":"s"}"#).unwrap();
        assert!(user.is_valid(time::now()));
        assert_eq!(user.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn oversized_lifetime_is_kept_without_expiry() {
        let mut user: AuthorizedUser =
            serde_json::from_str(r#"{"token":"old","client_id":"c","client_secret":"s"}"#).unwrap();

        user.apply(TokenResponse {
            access_token: "fresh".to_string(),
            expires_in: Some(i64::MAX),
            refresh_token: None,
            scope: None,
        });

        assert_eq!(user.token.as_deref(), Some("fresh"));
        assert_eq!(user.expiry, None);
        let json = serde_json::to_string(&user).unwrap();
        let reloaded: AuthorizedUser = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded, user);
    }

    #[tokio::test]
    async fn missing_token_and_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Authenticator::new(
            test_http(),
            dir.path().join("credentials.json"),
            dir.path().join("token.json"),
        );
        assert!(matches!(
            auth.access_token().await,
            Err(AuthError::MissingCredentials(_))
        ));

        tokio::fs::write(dir.path().join("credentials.json"), "{}")
            .await
            .unwrap();
        assert!(matches!(
            auth.access_token().await,
            Err(AuthError::NotAuthorized(_))
        ));
    }

    #[tokio::test]
    async fn valid_token_is_used_without_refresh() {
        let fake = FakeDrive::start().await;
        let dir = tempfile::tempdir().unwrap();
        let token_path = write_token(dir.path(), &fake, false, "refresh-ok").await;
        let auth = Authenticator::new(test_http(), dir.path().join("c.json"), token_path);

        assert_eq!(auth.access_token().await.unwrap(), "stored-token");
        assert_eq!(fake.token_requests(), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once_and_persisted() {
        let fake = FakeDrive::start().await;
        let dir = tempfile::tempdir().unwrap();
        let token_path = write_token(dir.path(), &fake, true, "refresh-ok").await;
        let auth = std::sync::Arc::new(Authenticator::new(
            test_http(),
            dir.path().join("c.json"),
            token_path.clone(),
        ));

        let (a, b) = tokio::join!(auth.access_token(), auth.access_token());
        assert_eq!(a.unwrap(), "fresh-token");
        assert_eq!(b.unwrap(), "fresh-token");
        assert_eq!(fake.token_requests(), 1);

        let saved = AuthorizedUser::load(&token_path).await.unwrap().unwrap();
        assert_eq!(saved.token.as_deref(), Some("fresh-token"));
        assert_eq!(saved.refresh_token.as_deref(), Some("refresh-ok"));
        assert!(saved.is_valid(time::now()));
    }

    #[tokio::test]
    async fn revoked_refresh_token_removes_stale_file() {
        let fake = FakeDrive::start().await;
        let dir = tempfile::tempdir().unwrap();
        let token_path = write_token(dir.path(), &fake, true, "revoked").await;
        let auth = Authenticator::new(test_http(), dir.path().join("c.json"), token_path.clone());

        let err = auth.access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Reauthorize(ref m) if m.contains("invalid_grant")));
        assert!(!token_path.exists());
    }
}
