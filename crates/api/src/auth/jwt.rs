//! HS256 access tokens for app clients

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::middleware::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    pub tenant_id: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: user_id,
            tenant_id,
            iat: now,
            exp: now + self.expiry_hours * 3600,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "JWT validation failed");
                AuthError::InvalidToken
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_validate() {
        let manager = JwtManager::new("test-jwt-secret", 1);
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        let token = manager.generate_access_token(user_id, tenant_id).unwrap();
        let claims = manager.validate_access_token(&token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.tenant_id, tenant_id);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_rejects_wrong_secret_and_expired() {
        let issuer = JwtManager::new("secret-a", 1);
        let token = issuer
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();
        assert!(JwtManager::new("secret-b", 1)
            .validate_access_token(&token)
            .is_err());

        let expired = JwtManager::new("secret-a", -2)
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();
        assert!(matches!(
            issuer.validate_access_token(&expired),
            Err(AuthError::InvalidToken)
        ));
    }
}
