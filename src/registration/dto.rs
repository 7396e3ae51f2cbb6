use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::registration::repo_types::{Identity, PublicIdentity};

/// Request body for `POST /validate-username`.
#[derive(Debug, Deserialize)]
pub struct ValidateUsernameRequest {
    #[serde(default)]
    pub username: Option<String>,
}

/// Response body for `POST /validate-username`.
#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl AvailabilityResponse {
    pub fn of(available: bool) -> Self {
        Self {
            available,
            message: None,
        }
    }

    pub fn username_required() -> Self {
        Self {
            available: false,
            message: Some("Username is required."),
        }
    }
}

/// Request body for `POST /submit-form`. Unknown keys land in `extra`.
#[derive(Default, Deserialize)]
pub struct SubmitFormRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl fmt::Debug for SubmitFormRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitFormRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 201 body for a successful registration.
#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub success: bool,
    pub message: &'static str,
    pub user: PublicIdentity,
}

impl RegistrationResponse {
    pub fn created(identity: &Identity) -> Self {
        Self {
            success: true,
            message: "Registration successful!",
            user: PublicIdentity::from(identity),
        }
    }
}
