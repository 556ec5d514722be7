//! JWT token generation and validation
//! 访问令牌由运维 CLI 或共享密钥的外部身份服务签发

use crate::{config::AppConfig, error::AppError};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ACCESS_TOKEN: &str = "access";

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Display name
    pub name: String,

    /// Token type
    pub token_type: String,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,

    /// JWT ID (unique token identifier)
    pub jti: String,
}

impl Claims {
    /// 用户 ID
    pub fn user_id(&self) -> Result<i64, AppError> {
        self.sub.parse().map_err(|_| AppError::Unauthorized)
    }
}

/// JWT service
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_exp_secs: u64,
}

impl JwtService {
    pub fn new(secret: &str, access_token_exp_secs: u64) -> Result<Self, AppError> {
        // HS256 至少 32 字节
        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_exp_secs,
        })
    }

    /// Create JWT service from config
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            config.security.jwt_secret.expose_secret(),
            config.security.access_token_exp_secs,
        )
    }

    /// Generate access token
    pub fn generate_access_token(&self, user_id: i64, name: &str) -> Result<String, AppError> {
        let now = Utc::now();
        let expiration = now + Duration::seconds(self.access_token_exp_secs as i64);

        let claims = Claims {
            sub: user_id.to_string(),
            name: name.to_string(),
            token_type: ACCESS_TOKEN.to_string(),
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode access token: {:?}", e);
            AppError::Internal(format!("Failed to encode access token: {}", e))
        })
    }

    /// Validate access token
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AppError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                tracing::debug!("Token validation failed: {:?}", e);
                AppError::Unauthorized
            })?
            .claims;

        if claims.token_type != ACCESS_TOKEN {
            tracing::debug!("Token type mismatch: expected 'access', got '{}'", claims.token_type);
            return Err(AppError::Unauthorized);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret_key_32_characters_long!";

    #[test]
    fn test_generate_and_validate_access_token() {
        let service = JwtService::new(SECRET, 900).unwrap();

        let token = service.generate_access_token(42, "Ana").unwrap();

        let claims = service.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.name, "Ana");
        assert_eq!(claims.token_type, "access");
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(JwtService::new("short", 900).is_err());
    }

    #[test]
    fn test_invalid_token_fails() {
        let service = JwtService::new(SECRET, 900).unwrap();
        assert!(service.validate_access_token("invalid_token").is_err());
    }

    #[test]
    fn test_token_from_other_secret_fails() {
        let issuer = JwtService::new("another_secret_key_32_characters_xx", 900).unwrap();
        let service = JwtService::new(SECRET, 900).unwrap();

        let token = issuer.generate_access_token(1, "Ana").unwrap();
        assert!(service.validate_access_token(&token).is_err());
    }
}
