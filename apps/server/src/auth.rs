//! JWT-backed `AuthProvider` (§6.2).
//!
//! The core only needs `{userID, username, role}` from a bearer credential;
//! it never validates the credential itself. This is the binary crate's
//! production implementation of that seam — a symmetric-key JWT verifier,
//! wired from the `JWT_SECRET` configuration value.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use playsync_core::{AuthProvider, AuthenticatedUser, Role};
use serde::Deserialize;

/// Claims carried by a bearer credential minted by the session layer.
#[derive(Debug, Deserialize)]
struct Claims {
    /// Subject: the authenticated user id.
    sub: i64,
    username: String,
    role: String,
    /// Standard expiry claim; `jsonwebtoken` rejects an expired token before
    /// this struct is even built.
    #[allow(dead_code)]
    exp: usize,
}

impl Claims {
    fn role(&self) -> Option<Role> {
        match self.role.as_str() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            "owner" => Some(Role::Owner),
            _ => None,
        }
    }
}

/// Verifies bearer tokens as HS256 JWTs signed with a shared secret.
pub struct JwtAuthProvider {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthProvider {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl AuthProvider for JwtAuthProvider {
    async fn extract_user(&self, bearer_token: Option<&str>) -> Option<AuthenticatedUser> {
        let token = bearer_token?;
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).ok()?;
        let role = data.claims.role()?;
        Some(AuthenticatedUser {
            user_id: data.claims.sub,
            username: data.claims.username,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, user_id: i64, username: &str, role: &str, exp: usize) -> String {
        let claims = serde_json::json!({
            "sub": user_id,
            "username": username,
            "role": role,
            "exp": exp,
        });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn valid_token_resolves_authenticated_user() {
        let provider = JwtAuthProvider::new("test-secret");
        let jwt = token("test-secret", 7, "alice", "owner", 9_999_999_999);
        let user = provider.extract_user(Some(&jwt)).await.unwrap();
        assert_eq!(user.user_id, 7);
        assert_eq!(user.username, "alice");
        assert_eq!(user.role, Role::Owner);
    }

    #[tokio::test]
    async fn token_signed_with_wrong_secret_is_rejected() {
        let provider = JwtAuthProvider::new("test-secret");
        let jwt = token("other-secret", 7, "alice", "owner", 9_999_999_999);
        assert!(provider.extract_user(Some(&jwt)).await.is_none());
    }

    #[tokio::test]
    async fn missing_token_resolves_nothing() {
        let provider = JwtAuthProvider::new("test-secret");
        assert!(provider.extract_user(None).await.is_none());
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let provider = JwtAuthProvider::new("test-secret");
        let jwt = token("test-secret", 7, "alice", "superadmin", 9_999_999_999);
        assert!(provider.extract_user(Some(&jwt)).await.is_none());
    }
}
