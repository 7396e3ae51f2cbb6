use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{FieldError, RegistrationError},
    registration::{
        dto::SubmitFormRequest,
        repo::DirectoryError,
        repo_types::Identity,
    },
    state::AppState,
};

pub const USERNAME_MIN_LEN: usize = 3;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const ATTRIBUTE_MAX_LEN: usize = 256;

pub const USERNAME_TOO_SHORT: &str = "Username must be at least 3 characters long.";
pub const USERNAME_TAKEN: &str = "Username is already taken.";
pub const EMAIL_INVALID: &str = "Please provide a valid email address.";
pub const PASSWORD_TOO_SHORT: &str = "Password must be at least 8 characters long.";
pub const ATTRIBUTE_INVALID: &str =
    "Field must be a string, number, or boolean of at most 256 characters.";

/// Keys an extra attribute may never use.
const CANONICAL_FIELDS: [&str; 5] = ["id", "username", "email", "password", "registeredAt"];

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.(?i:[a-z]{2,}|xn--[a-z0-9-]+)$").unwrap();
    }
    if email.len() > 254 || !EMAIL_RE.is_match(email) {
        return false;
    }
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    local.len() <= 64
        && !local.starts_with('.')
        && !local.ends_with('.')
        && !email.contains("..")
        && domain
            .split('.')
            .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'))
}

/// Canonical form of an already-valid address: lowercased, with the
/// provider-specific aliases folded away.
pub(crate) fn normalize_email(email: &str) -> String {
    let lowered = email.trim().to_lowercase();
    let Some((local, domain)) = lowered.rsplit_once('@') else {
        return lowered;
    };

    let (local, domain) = match domain {
        "gmail.com" | "googlemail.com" => {
            let base = local.split('+').next().unwrap_or_default().replace('.', "");
            (base, "gmail.com")
        }
        "outlook.com" | "hotmail.com" | "live.com" | "icloud.com" | "me.com" => {
            (local.split('+').next().unwrap_or_default().to_string(), domain)
        }
        "yahoo.com" | "ymail.com" | "rocketmail.com" => {
            (local.split('-').next().unwrap_or_default().to_string(), domain)
        }
        _ => (local.to_string(), domain),
    };

    if local.is_empty() {
        return lowered;
    }
    format!("{local}@{domain}")
}

/// Keeps allow-listed scalar attributes; records a rule failure for
/// allow-listed keys with unusable values.
fn accept_attributes(
    extra: Map<String, Value>,
    allowed: &[String],
    errors: &mut Vec<FieldError>,
) -> Map<String, Value> {
    let mut accepted = Map::new();
    for (key, value) in extra {
        let permitted = allowed.iter().any(|a| a == &key) && !CANONICAL_FIELDS.contains(&key.as_str());
        if !permitted {
            debug!(field = %key, "dropping field outside the allow-list");
            continue;
        }
        if value.is_null() {
            continue;
        }
        if is_scalar_attribute(&value) {
            accepted.insert(key, value);
        } else {
            errors.push(FieldError::new(key, ATTRIBUTE_INVALID));
        }
    }
    accepted
}

fn is_scalar_attribute(value: &Value) -> bool {
    match value {
        Value::String(s) => s.chars().count() <= ATTRIBUTE_MAX_LEN,
        Value::Number(_) | Value::Bool(_) => true,
        _ => false,
    }
}

/// Read-only, case-insensitive availability query.
pub async fn is_available(state: &AppState, username: &str) -> Result<bool, DirectoryError> {
    Ok(!state.directory.contains(username).await?)
}

/// Validate, hash, and store one registration.
///
/// All rules are evaluated before anything is reported. The uniqueness
/// pre-check only exists to report a taken name alongside the other rule
/// failures; the directory's `insert_if_absent` is what actually decides
/// between two racing submissions.
pub async fn register(
    state: &AppState,
    form: SubmitFormRequest,
) -> Result<Identity, RegistrationError> {
    let username = form.username.as_deref().unwrap_or_default().trim().to_string();
    let email = form.email.as_deref().unwrap_or_default().trim().to_string();
    let password = form.password.unwrap_or_default();

    let mut errors = Vec::new();

    if username.chars().count() < USERNAME_MIN_LEN {
        errors.push(FieldError::new("username", USERNAME_TOO_SHORT));
    } else if state
        .directory
        .contains(&username)
        .await
        .map_err(directory_failure)?
    {
        errors.push(FieldError::new("username", USERNAME_TAKEN));
    }

    let email = if is_valid_email(&email) {
        normalize_email(&email)
    } else {
        errors.push(FieldError::new("email", EMAIL_INVALID));
        email
    };

    if password.chars().count() < PASSWORD_MIN_LEN {
        errors.push(FieldError::new("password", PASSWORD_TOO_SHORT));
    }

    let attributes = accept_attributes(form.extra, &state.config.extra_fields, &mut errors);

    if !errors.is_empty() {
        warn!(%username, failed = errors.len(), "registration rejected");
        return Err(RegistrationError::Validation(errors));
    }

    let password_hash = state.hasher.hash_password_blocking(password).await?;

    let identity = Identity {
        id: Uuid::now_v7(),
        username,
        email,
        password_hash,
        registered_at: OffsetDateTime::now_utc(),
        attributes,
    };

    let identity = match state.directory.insert_if_absent(identity).await {
        Ok(identity) => identity,
        Err(DirectoryError::Taken(name)) => {
            warn!(username = %name, "username claimed by a concurrent registration");
            return Err(RegistrationError::Validation(vec![FieldError::new(
                "username",
                USERNAME_TAKEN,
            )]));
        }
        Err(e) => return Err(directory_failure(e)),
    };

    info!(username = %identity.username, email = %identity.email, "user registered");
    Ok(identity)
}

fn directory_failure(e: DirectoryError) -> RegistrationError {
    RegistrationError::Internal(anyhow::Error::new(e).context("directory access failed"))
}
