use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const ACTOR_HEADER: &str = "x-user-id";

/// The person or service performing a mutation, taken from the `X-User-ID`
/// header set by the upstream portal. Authorisation has already been checked
/// there; the ledger only records who acted.
#[derive(Debug, Clone)]
pub struct Actor(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing X-User-ID header")))?;

        tracing::Span::current().record("user_id", actor);

        Ok(Actor(actor.to_string()))
    }
}
