use crate::{RealtimeError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 已认证的连接主体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub roles: Vec<String>,
}

/// 连接建立时校验令牌
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Principal>;
}

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // 用户 ID
    pub roles: Vec<String>, // 用户角色
    pub exp: i64,           // 过期时间
    pub iat: i64,           // 签发时间
    pub jti: String,        // JWT ID
}

/// HS256 JWT 认证
pub struct JwtAuth {
    secret: Arc<String>,
    expiration: Duration,
}

impl JwtAuth {
    pub fn new(secret: impl Into<String>, expiration_hours: i64) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            expiration: Duration::hours(expiration_hours),
        }
    }

    /// 签发令牌（运维工具和测试使用）
    pub fn generate_token(&self, user_id: &str, roles: Vec<String>) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            roles,
            exp: (now + self.expiration).timestamp(),
            iat: now.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| RealtimeError::Auth(e.to_string()))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| RealtimeError::Auth(e.to_string()))?;

        Ok(token_data.claims)
    }
}

impl TokenVerifier for JwtAuth {
    fn verify(&self, token: &str) -> Result<Principal> {
        let claims = self.verify_token(token)?;
        if claims.sub.trim().is_empty() {
            return Err(RealtimeError::Auth("empty subject".to_string()));
        }
        Ok(Principal {
            id: claims.sub,
            roles: claims.roles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_verify_token() {
        let auth = JwtAuth::new("test-secret", 1);

        let token = auth
            .generate_token("alice", vec!["viewer".to_string()])
            .unwrap();
        let principal = auth.verify(&token).unwrap();

        assert_eq!(principal.id, "alice");
        assert_eq!(principal.roles, vec!["viewer"]);
    }

    #[test]
    fn test_invalid_token() {
        let auth = JwtAuth::new("test-secret", 1);
        assert!(matches!(
            auth.verify("invalid-token"),
            Err(RealtimeError::Auth(_))
        ));
    }

    #[test]
    fn test_wrong_secret_and_expired() {
        let issuer = JwtAuth::new("secret-a", 1);
        let verifier = JwtAuth::new("secret-b", 1);
        let token = issuer.generate_token("alice", vec![]).unwrap();
        assert!(verifier.verify(&token).is_err());

        // 默认校验留 60 秒余量，过期两小时的令牌必然被拒
        let expired = JwtAuth::new("secret-a", -2);
        let token = expired.generate_token("alice", vec![]).unwrap();
        assert!(issuer.verify(&token).is_err());
    }
}
