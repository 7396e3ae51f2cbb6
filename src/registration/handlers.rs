use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tracing::{error, instrument, warn};

use crate::{
    error::{FieldError, RegistrationError},
    registration::{
        dto::{AvailabilityResponse, RegistrationResponse, SubmitFormRequest, ValidateUsernameRequest},
        services,
    },
    state::AppState,
};

const MALFORMED_BODY: &str =
    "Request body must be a JSON object with string username, email and password fields.";

pub fn registration_routes() -> Router<AppState> {
    Router::new()
        .route("/validate-username", post(validate_username))
        .route("/submit-form", post(submit_form))
}

#[instrument(skip(state, payload))]
pub async fn validate_username(
    State(state): State<AppState>,
    payload: Result<Json<ValidateUsernameRequest>, JsonRejection>,
) -> Response {
    let username = match payload {
        Ok(Json(req)) => req.username,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "unreadable validate-username body");
            None
        }
    };

    let Some(username) = username.filter(|u| !u.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AvailabilityResponse::username_required()),
        )
            .into_response();
    };

    match services::is_available(&state, &username).await {
        Ok(available) => Json(AvailabilityResponse::of(available)).into_response(),
        Err(e) => {
            error!(error = %e, %username, "availability lookup failed");
            RegistrationError::Internal(e.into()).into_response()
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn submit_form(
    State(state): State<AppState>,
    payload: Result<Json<SubmitFormRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegistrationResponse>), RegistrationError> {
    let Json(form) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "unreadable submit-form body");
        RegistrationError::Validation(vec![FieldError::new("body", MALFORMED_BODY)])
    })?;

    let username = form.username.clone().unwrap_or_default();
    let identity = services::register(&state, form).await.map_err(|e| {
        if let RegistrationError::Internal(ref err) = e {
            error!(%username, error = ?err, "registration failed");
        }
        e
    })?;

    Ok((
        StatusCode::CREATED,
        Json(RegistrationResponse::created(&identity)),
    ))
}
