use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::config::FirebaseConfig;
use crate::error::{AppError, AppResult};
use crate::utils::jwt;

/// What the identity provider vouches for after checking a token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedToken {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    #[serde(skip)]
    pub issued_at: i64,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> AppResult<VerifiedToken>;

    /// Invalidates every token issued to `uid` so far
    async fn revoke_sessions(&self, uid: &str) -> AppResult<()>;

    async fn delete_account(&self, uid: &str) -> AppResult<()>;

    async fn mark_email_verified(&self, uid: &str) -> AppResult<()>;
}

/// Tokens revoked by this process, keyed by uid
#[derive(Default)]
struct Revocations {
    valid_since: Mutex<HashMap<String, i64>>,
}

/// First whole second at which new tokens are accepted again. Rounded up,
/// so tokens issued earlier in the current second are revoked too.
fn valid_since_now() -> i64 {
    let millis = Utc::now().timestamp_millis();
    millis.div_euclid(1000) + i64::from(millis.rem_euclid(1000) != 0)
}

impl Revocations {
    fn revoke(&self, uid: &str, valid_since: i64) {
        self.valid_since
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uid.to_string(), valid_since);
    }

    /// Tokens issued strictly before `validSince` are revoked
    fn check(&self, token: &VerifiedToken) -> AppResult<()> {
        let guard = self.valid_since.lock().unwrap_or_else(|e| e.into_inner());
        match guard.get(&token.uid) {
            Some(&since) if token.issued_at < since => {
                Err(AppError::InvalidToken("token has been revoked".to_string()))
            }
            _ => Ok(()),
        }
    }
}

// ---- local HS256 tokens ----

/// Signs and checks its own HS256 tokens. Used for development and tests.
pub struct LocalIdentityProvider {
    secret: String,
    expiration_hours: i64,
    revocations: Revocations,
    deleted: Mutex<HashSet<String>>,
    verified: Mutex<HashSet<String>>,
}

impl LocalIdentityProvider {
    pub fn new(secret: impl Into<String>, expiration_hours: i64) -> Self {
        Self {
            secret: secret.into(),
            expiration_hours,
            revocations: Revocations::default(),
            deleted: Mutex::new(HashSet::new()),
            verified: Mutex::new(HashSet::new()),
        }
    }

    pub fn issue(&self, uid: &str, email: Option<&str>) -> AppResult<String> {
        jwt::create_token(uid, email, false, &self.secret, self.expiration_hours)
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn verify(&self, token: &str) -> AppResult<VerifiedToken> {
        let claims = jwt::verify_token(token, &self.secret)?;

        if self
            .deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&claims.sub)
        {
            return Err(AppError::InvalidToken("account no longer exists".to_string()));
        }

        let email_verified = claims.email_verified
            || self
                .verified
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&claims.sub);

        let token = VerifiedToken {
            uid: claims.sub,
            email: claims.email,
            email_verified,
            issued_at: claims.iat,
        };
        self.revocations.check(&token)?;
        Ok(token)
    }

    async fn revoke_sessions(&self, uid: &str) -> AppResult<()> {
        self.revocations.revoke(uid, valid_since_now());
        Ok(())
    }

    async fn delete_account(&self, uid: &str) -> AppResult<()> {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uid.to_string());
        Ok(())
    }

    async fn mark_email_verified(&self, uid: &str) -> AppResult<()> {
        self.verified
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uid.to_string());
        Ok(())
    }
}

// ---- Firebase Authentication ----

const JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const ADMIN_SCOPES: &str =
    "https://www.googleapis.com/auth/identitytoolkit https://www.googleapis.com/auth/cloud-platform";
const JWKS_MAX_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    iat: i64,
    auth_time: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ServiceAccountAssertion<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

struct CachedAccessToken {
    token: String,
    expires_at: Instant,
}

/// Verifies Firebase ID tokens and drives account admin calls over REST
pub struct FirebaseIdentityProvider {
    http: Client,
    config: FirebaseConfig,
    keys: RwLock<Option<CachedKeys>>,
    access_token: RwLock<Option<CachedAccessToken>>,
    revocations: Revocations,
}

impl FirebaseIdentityProvider {
    pub fn new(http: Client, config: FirebaseConfig) -> Self {
        Self {
            http,
            config,
            keys: RwLock::new(None),
            access_token: RwLock::new(None),
            revocations: Revocations::default(),
        }
    }

    fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.config.project_id)
    }

    async fn decoding_key(&self, kid: &str) -> AppResult<DecodingKey> {
        {
            let cached = self.keys.read().await;
            if let Some(cached) = cached.as_ref() {
                if cached.fetched_at.elapsed() < JWKS_MAX_AGE {
                    if let Some(jwk) = cached.keys.find(kid) {
                        return DecodingKey::from_jwk(jwk)
                            .map_err(|e| AppError::InvalidToken(e.to_string()));
                    }
                }
            }
        }

        // Stale cache or a rotated key: fetch the set again
        let keys: JwkSet = self
            .http
            .get(JWKS_URL)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::Unavailable(format!("signing keys unavailable: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Unavailable(format!("signing keys unreadable: {e}")))?;

        let key = keys
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|e| AppError::InvalidToken(e.to_string()))?
            .ok_or_else(|| AppError::InvalidToken("unknown signing key".to_string()))?;

        tracing::debug!(count = keys.keys.len(), "Refreshed identity signing keys");
        *self.keys.write().await = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        Ok(key)
    }

    async fn admin_token(&self) -> AppResult<String> {
        if let Some(cached) = self.access_token.read().await.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let (Some(client_email), Some(private_key)) =
            (&self.config.client_email, &self.config.private_key)
        else {
            return Err(AppError::Internal(
                "service account credentials are not configured".to_string(),
            ));
        };

        let now = Utc::now().timestamp();
        let assertion = ServiceAccountAssertion {
            iss: client_email,
            scope: ADMIN_SCOPES,
            aud: OAUTH_TOKEN_URL,
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
            .map_err(|e| AppError::Internal(format!("bad service account key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &assertion, &key)
            .map_err(|e| AppError::Internal(format!("failed to sign assertion: {e}")))?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];
        let response: AccessTokenResponse = self
            .http
            .post(OAUTH_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::Unavailable(format!("token exchange failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Unavailable(format!("token response unreadable: {e}")))?;

        let token = response.access_token.clone();
        // Refresh a minute early
        let lifetime = Duration::from_secs(response.expires_in.saturating_sub(60));
        *self.access_token.write().await = Some(CachedAccessToken {
            token: response.access_token,
            expires_at: Instant::now() + lifetime,
        });

        Ok(token)
    }

    async fn admin_call(&self, action: &str, body: serde_json::Value) -> AppResult<()> {
        let token = self.admin_token().await?;
        let url = format!(
            "{IDENTITY_TOOLKIT_URL}/projects/{}/accounts:{action}",
            self.config.project_id
        );

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Unavailable(format!("identity admin call failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::BAD_REQUEST {
            let detail = response.text().await.unwrap_or_default();
            if detail.contains("USER_NOT_FOUND") {
                return Err(AppError::NotFound("Account not found".to_string()));
            }
            return Err(AppError::BadRequest(format!("identity admin call rejected: {detail}")));
        }
        Err(AppError::Unavailable(format!("identity admin call returned {status}")))
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    async fn verify(&self, token: &str) -> AppResult<VerifiedToken> {
        let header = decode_header(token).map_err(|e| AppError::InvalidToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AppError::InvalidToken("unexpected signing algorithm".to_string()));
        }
        let kid = header
            .kid
            .ok_or_else(|| AppError::InvalidToken("token has no key id".to_string()))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.config.project_id]);
        validation.set_issuer(&[self.issuer()]);

        let claims = decode::<FirebaseClaims>(token, &key, &validation)
            .map_err(|e| AppError::InvalidToken(e.to_string()))?
            .claims;

        if claims.sub.is_empty() {
            return Err(AppError::InvalidToken("token has no subject".to_string()));
        }

        let token = VerifiedToken {
            uid: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified,
            issued_at: claims.auth_time.unwrap_or(claims.iat),
        };
        self.revocations.check(&token)?;
        Ok(token)
    }

    async fn revoke_sessions(&self, uid: &str) -> AppResult<()> {
        let valid_since = valid_since_now();
        self.admin_call(
            "update",
            json!({ "localId": uid, "validSince": valid_since.to_string() }),
        )
        .await?;
        self.revocations.revoke(uid, valid_since);
        tracing::info!(uid, "Revoked identity sessions");
        Ok(())
    }

    async fn delete_account(&self, uid: &str) -> AppResult<()> {
        self.admin_call("delete", json!({ "localId": uid })).await?;
        tracing::info!(uid, "Deleted identity account");
        Ok(())
    }

    async fn mark_email_verified(&self, uid: &str) -> AppResult<()> {
        self.admin_call("update", json!({ "localId": uid, "emailVerified": true }))
            .await
    }
}
