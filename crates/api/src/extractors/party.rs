//! Authenticated party extraction.
//!
//! Authentication itself lives outside this service: the fronting gateway
//! validates credentials and forwards the caller's identity in the
//! `X-Party-Id` and `X-Party-Role` headers. This extractor is the whole of
//! the auth interface the dispatch core sees.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::ApiError;
use domain::models::Role;

/// Header carrying the authenticated party's id.
pub const PARTY_ID_HEADER: &str = "x-party-id";

/// Header carrying the authenticated party's role.
pub const PARTY_ROLE_HEADER: &str = "x-party-role";

/// The authenticated caller of a request or socket.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedParty {
    pub party_id: Uuid,
    pub role: Role,
}

impl AuthenticatedParty {
    /// Reject callers whose role does not match the operation.
    pub fn require(&self, role: Role) -> Result<(), ApiError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ApiError::Unauthorized(format!(
                "This operation requires the {} role",
                role
            )))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedParty
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let party_id = parts
            .headers
            .get(PARTY_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Uuid>().ok())
            .ok_or_else(|| {
                ApiError::Unauthorized("Missing or invalid party identity".to_string())
            })?;

        let role = parts
            .headers
            .get(PARTY_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Role>().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing or invalid party role".to_string()))?;

        Ok(AuthenticatedParty { party_id, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(headers: &[(&str, &str)]) -> Result<AuthenticatedParty, ApiError> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        AuthenticatedParty::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_extracts_valid_identity() {
        let id = Uuid::new_v4();
        let party = extract(&[
            (PARTY_ID_HEADER, &id.to_string()),
            (PARTY_ROLE_HEADER, "driver"),
        ])
        .await
        .unwrap();

        assert_eq!(party.party_id, id);
        assert_eq!(party.role, Role::Driver);
    }

    #[tokio::test]
    async fn test_rejects_missing_headers() {
        assert!(extract(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_bad_role() {
        let id = Uuid::new_v4();
        let result = extract(&[
            (PARTY_ID_HEADER, &id.to_string()),
            (PARTY_ROLE_HEADER, "superuser"),
        ])
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_require_role() {
        let party = AuthenticatedParty {
            party_id: Uuid::new_v4(),
            role: Role::Passenger,
        };
        assert!(party.require(Role::Passenger).is_ok());
        assert!(party.require(Role::Driver).is_err());
    }
}
