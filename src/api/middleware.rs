use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Deserialize;

use crate::{
    error::{AppError, AppResult},
    models::Participant,
    services::auth::Claims,
    AppState,
};

/// Browsers cannot set headers on a WebSocket handshake, so the token may also
/// ride in the query string.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub access_token: Option<String>,
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<TokenQuery>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = match (&bearer, &query.access_token) {
        (Some(TypedHeader(authorization)), _) => authorization.token(),
        (None, Some(token)) => token.as_str(),
        (None, None) => return Err(AppError::Unauthorized),
    };

    let claims = state.tokens.verify(token)?;

    // Insert claims into request extensions
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Extract the authenticated participant from request extensions
pub fn get_participant(claims: &Claims) -> AppResult<Participant> {
    claims.participant()
}
