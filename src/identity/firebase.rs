use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::identity::{IdentityError, IdentityProvider};

const SIGN_UP_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:signUp";
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
    id_token: String,
}

/// Anonymous Firebase session. The first resolution performs a silent
/// anonymous sign-up against the Identity Toolkit API; the resulting user id
/// and id token are cached for the rest of the process.
pub struct FirebaseSession {
    client: reqwest::Client,
    api_key: String,
    session: OnceCell<SignUpResponse>,
}

impl FirebaseSession {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            api_key,
            session: OnceCell::new(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("HEXA_FIREBASE_API_KEY")
            .map_err(|_| anyhow::anyhow!("HEXA_FIREBASE_API_KEY not set"))?;
        Ok(Self::new(api_key))
    }

    /// Bearer token for Firestore requests, resolving the session if needed.
    pub async fn id_token(&self) -> Result<String, IdentityError> {
        Ok(self.resolve().await?.id_token.clone())
    }

    async fn resolve(&self) -> Result<&SignUpResponse, IdentityError> {
        self.session
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .post(SIGN_UP_URL)
                    .query(&[("key", self.api_key.as_str())])
                    .json(&serde_json::json!({ "returnSecureToken": true }))
                    .send()
                    .await
                    .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(IdentityError::Unavailable(format!(
                        "anonymous sign-in returned {status}: {body}"
                    )));
                }

                let session: SignUpResponse = response
                    .json()
                    .await
                    .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
                tracing::info!(owner_id = %session.local_id, "anonymous session established");
                Ok(session)
            })
            .await
    }
}

#[async_trait::async_trait]
impl IdentityProvider for FirebaseSession {
    async fn owner_id(&self) -> Result<String, IdentityError> {
        Ok(self.resolve().await?.local_id.clone())
    }

    fn cached_owner_id(&self) -> Option<String> {
        self.session.get().map(|s| s.local_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sign_up_response() {
        let json = r#"{"kind":"identitytoolkit#SignupNewUserResponse","idToken":"tok","refreshToken":"ref","expiresIn":"3600","localId":"user-1"}"#;
        let parsed: SignUpResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.local_id, "user-1");
        assert_eq!(parsed.id_token, "tok");
    }

    #[test]
    fn cached_id_is_empty_before_first_resolution() {
        let session = FirebaseSession::new("key".to_string());
        assert!(session.cached_owner_id().is_none());
    }
}
