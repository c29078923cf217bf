use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::civil_time::Clock;
use crate::jwt::validate_token_at;
use crate::state::AppState;

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let auth_value = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    let token = auth_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))?;

    let user = validate_token_at(token, &state.config.supabase_jwt_secret, state.clock.now())
        .map_err(|e| AppError::Auth(e.to_string()))?;

    debug!("Authenticated {} as {:?}", user.id, user.role);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

pub fn extract_user<B>(request: &Request<B>) -> Result<User, AppError> {
    request
        .extensions()
        .get::<User>()
        .cloned()
        .ok_or_else(|| AppError::Auth("User not found in request extensions".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestUser;

    #[test]
    fn user_is_read_back_from_extensions() {
        let user = TestUser::doctor("doc@example.com").to_user();
        let mut request = Request::new(());
        assert!(extract_user(&request).is_err());

        request.extensions_mut().insert(user.clone());
        assert_eq!(extract_user(&request).unwrap().id, user.id);
    }
}
