use super::*;

fn bearer_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?;
    let raw = header.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?;
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Checks the bearer token when one is configured; a blank token disables auth.
pub(super) fn authorize_control_request(
    state: &ControlSurfaceState,
    headers: &HeaderMap,
) -> Result<(), ControlApiError> {
    let Some(expected) = state
        .config
        .auth_token
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(());
    };
    match bearer_token_from_headers(headers) {
        Some(observed) if observed == expected => Ok(()),
        _ => {
            let failures = state.auth_failures.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(auth_failures = failures, "control request rejected");
            Err(ControlApiError::unauthorized())
        }
    }
}
