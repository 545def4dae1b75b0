use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use shared::{Permission, Role};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::{NewUser, User};
use crate::schema::users;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
}

/// Verifies HS256 access tokens issued by the identity provider.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify_bearer(&self, header: &str) -> ApiResult<Claims> {
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                warn!("Rejected access token: {}", e);
                ApiError::Unauthorized
            })
    }
}

/// The authenticated user behind a request, with the role read from the
/// users table rather than trusted from the token.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl Caller {
    pub fn can(&self, permission: Permission) -> bool {
        self.role.allows(permission)
    }

    pub fn require(&self, permission: Permission) -> ApiResult<()> {
        if self.can(permission) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "role `{}` is not allowed to perform this action",
                self.role
            )))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        let claims = state.auth.verify_bearer(header)?;

        let mut conn = state.pool.get().await?;
        let user = load_or_provision(&mut conn, &claims).await?;

        if user.deleted_at.is_some() {
            return Err(ApiError::Forbidden("account has been deactivated".to_string()));
        }

        let role = user.role().map_err(|e| {
            warn!("User {} has an unusable role: {}", user.id, e);
            ApiError::Forbidden("account role is not recognised".to_string())
        })?;

        Ok(Caller {
            user_id: user.id,
            email: user.email,
            role,
        })
    }
}

/// First authenticated request of a new account creates its profile as a client.
async fn load_or_provision(conn: &mut AsyncPgConnection, claims: &Claims) -> ApiResult<User> {
    let existing = users::table
        .find(claims.sub)
        .select(User::as_select())
        .first(conn)
        .await
        .optional()?;
    if let Some(user) = existing {
        return Ok(user);
    }

    let email = claims
        .email
        .clone()
        .ok_or_else(|| ApiError::Forbidden("token carries no email to register".to_string()))?;

    let new_user = NewUser {
        id: claims.sub,
        email,
        role: Role::Client.as_str().to_string(),
    };
    diesel::insert_into(users::table)
        .values(&new_user)
        .on_conflict(users::id)
        .do_nothing()
        .execute(conn)
        .await?;
    info!("Provisioned profile for user {}", claims.sub);

    let user = users::table
        .find(claims.sub)
        .select(User::as_select())
        .first(conn)
        .await?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: Uuid,
        email: &'a str,
        aud: &'a str,
        exp: i64,
    }

    fn token(secret: &str, aud: &str, exp_offset_secs: i64) -> String {
        let claims = TestClaims {
            sub: Uuid::new_v4(),
            email: "client@example.com",
            aud,
            exp: chrono::Utc::now().timestamp() + exp_offset_secs,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn accepts_valid_bearer_token() {
        let verifier = JwtVerifier::new(SECRET, "authenticated");
        let claims = verifier
            .verify_bearer(&format!("Bearer {}", token(SECRET, "authenticated", 3600)))
            .unwrap();
        assert_eq!(claims.email.as_deref(), Some("client@example.com"));
    }

    #[test]
    fn rejects_bad_tokens() {
        let verifier = JwtVerifier::new(SECRET, "authenticated");

        let wrong_secret = token("other-secret", "authenticated", 3600);
        assert!(matches!(
            verifier.verify_bearer(&format!("Bearer {}", wrong_secret)),
            Err(ApiError::Unauthorized)
        ));

        let expired = token(SECRET, "authenticated", -3600);
        assert!(verifier.verify_bearer(&format!("Bearer {}", expired)).is_err());

        let wrong_audience = token(SECRET, "anon", 3600);
        assert!(verifier.verify_bearer(&format!("Bearer {}", wrong_audience)).is_err());

        let valid = token(SECRET, "authenticated", 3600);
        assert!(verifier.verify_bearer(&valid).is_err());
        assert!(verifier.verify_bearer("Bearer ").is_err());
    }

    #[test]
    fn require_checks_role_permissions() {
        let caller = Caller {
            user_id: Uuid::new_v4(),
            email: "m@example.com".to_string(),
            role: Role::Marketing,
        };
        assert!(caller.require(Permission::ManageDiscounts).is_ok());
        assert!(matches!(
            caller.require(Permission::ManageOrders),
            Err(ApiError::Forbidden(_))
        ));
    }
}
