/**
 * Session Tokens
 *
 * HS256 JWT verification for chat connections. The identity issuer signs
 * tokens with the shared `jwt_secret`; `sub` carries the user UUID and an
 * optional `role` of `"moderator"` grants moderator deletes.
 */

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use super::{AuthError, Authenticator, Identity};

pub const MODERATOR_ROLE: &str = "moderator";

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at time (Unix timestamp)
    pub iat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Verifies HS256 tokens signed with a shared secret
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Sign a token for `user_id`, valid for `ttl_secs`.
    ///
    /// The chat server never hands these out itself; this exists for the
    /// identity issuer's tooling and for tests.
    pub fn issue_token(
        &self,
        user_id: Uuid,
        moderator: bool,
        ttl_secs: u64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + ttl_secs,
            iat: now,
            role: moderator.then(|| MODERATOR_ROLE.to_string()),
        };
        encode(&Header::default(), &claims, &self.encoding)
    }

    /// Verify and decode a JWT token
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.verify(token)?;
        let user_id =
            Uuid::parse_str(&claims.sub).map_err(|e| AuthError::InvalidSubject(e.to_string()))?;
        Ok(Identity {
            user_id,
            moderator: claims.role.as_deref() == Some(MODERATOR_ROLE),
        })
    }
}
