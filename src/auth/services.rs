use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::auth::{
    credentials::{generate_token_key, hash_password, verify_password},
    dto::{LoginRequest, RegisterRequest},
    repo::{UniqueField, UserStore},
    repo_types::{AuthToken, NewUser, Role, User},
};
use crate::error::{duplicate_message, AppError, AppResult, FieldErrors};

pub const USERNAME_MAX_LEN: usize = 150;
pub const EMAIL_MAX_LEN: usize = 254;
pub const NAME_MAX_LEN: usize = 150;

const MSG_REQUIRED: &str = "This field is required.";
const MSG_BLANK: &str = "This field may not be blank.";
const MSG_BAD_USERNAME: &str = concat!(
    "Enter a valid username. This value may contain only letters, ",
    "numbers, and @/./+/-/_ characters."
);
const MSG_BAD_EMAIL: &str = "Enter a valid email address.";
const MSG_PASSWORD_MISMATCH: &str = "Password fields didn't match.";

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[\w.@+-]+$").unwrap();
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn too_long(max: usize) -> String {
    format!("Ensure this field has no more than {max} characters.")
}

/// Presence and blank checks shared by every required field. Whitespace-only
/// values are blank even when `trim` is false; `trim` only decides what is kept.
fn required(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<String>,
    trim: bool,
) -> Option<String> {
    let Some(raw) = value else {
        errors.add(field, MSG_REQUIRED);
        return None;
    };
    if raw.trim().is_empty() {
        errors.add(field, MSG_BLANK);
        return None;
    }
    Some(if trim { raw.trim().to_string() } else { raw })
}

fn optional_name(errors: &mut FieldErrors, field: &str, value: Option<String>) -> String {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.chars().count() > NAME_MAX_LEN {
        errors.add(field, too_long(NAME_MAX_LEN));
    }
    value
}

/// A registration that passed every format check. Uniqueness is checked
/// separately because it needs the store.
#[derive(Debug)]
pub struct ValidRegistration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
}

pub fn validate_registration(req: RegisterRequest) -> Result<ValidRegistration, FieldErrors> {
    let mut errors = FieldErrors::new();

    let username = required(&mut errors, "username", req.username, true);
    if let Some(u) = &username {
        if u.chars().count() > USERNAME_MAX_LEN {
            errors.add("username", too_long(USERNAME_MAX_LEN));
        } else if !is_valid_username(u) {
            errors.add("username", MSG_BAD_USERNAME);
        }
    }

    let email = required(&mut errors, "email", req.email, true).map(|e| normalize_email(&e));
    if let Some(e) = &email {
        if e.chars().count() > EMAIL_MAX_LEN {
            errors.add("email", too_long(EMAIL_MAX_LEN));
        } else if !is_valid_email(e) {
            errors.add("email", MSG_BAD_EMAIL);
        }
    }

    let password = required(&mut errors, "password", req.password, false);
    if let (Some(p), Some(confirm)) = (&password, &req.password_confirm) {
        if p != confirm {
            errors.add("password", MSG_PASSWORD_MISMATCH);
        }
    }

    let role = match req.role {
        None => {
            errors.add("role", MSG_REQUIRED);
            None
        }
        Some(value) => {
            let parsed = value.as_str().and_then(|r| r.parse::<Role>().ok());
            if parsed.is_none() {
                let shown = match &value {
                    Value::String(r) => r.clone(),
                    other => other.to_string(),
                };
                errors.add("role", format!("\"{shown}\" is not a valid choice."));
            }
            parsed
        }
    };

    let first_name = optional_name(&mut errors, "first_name", req.first_name);
    let last_name = optional_name(&mut errors, "last_name", req.last_name);

    match (username, email, password, role) {
        (Some(username), Some(email), Some(password), Some(role)) if errors.is_empty() => {
            Ok(ValidRegistration {
                username,
                email,
                password,
                role,
                first_name,
                last_name,
            })
        }
        _ => Err(errors),
    }
}

/// How a login request names the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentifier {
    Username(String),
    Email(String),
}

pub fn validate_login(req: LoginRequest) -> Result<(LoginIdentifier, String), FieldErrors> {
    let mut errors = FieldErrors::new();

    let identifier = match (req.username, req.email) {
        (Some(username), _) => required(&mut errors, "username", Some(username), true)
            .map(LoginIdentifier::Username),
        (None, Some(email)) => required(&mut errors, "email", Some(email), true)
            .map(|e| LoginIdentifier::Email(normalize_email(&e))),
        (None, None) => {
            required(&mut errors, "username", None, true).map(LoginIdentifier::Username)
        }
    };
    let password = required(&mut errors, "password", req.password, false);

    match (identifier, password) {
        (Some(identifier), Some(password)) => Ok((identifier, password)),
        _ => Err(errors),
    }
}

/// Validate, check uniqueness, then persist the user and issue its token.
/// Nothing is written unless every check passes.
#[instrument(skip(store, req))]
pub async fn register_user(
    store: &dyn UserStore,
    req: RegisterRequest,
) -> AppResult<(User, AuthToken)> {
    let valid = validate_registration(req).map_err(AppError::Validation)?;

    let mut errors = FieldErrors::new();
    if store.find_by_username(&valid.username).await?.is_some() {
        errors.add("username", duplicate_message(UniqueField::Username));
    }
    if store.find_by_email(&valid.email).await?.is_some() {
        errors.add("email", duplicate_message(UniqueField::Email));
    }
    errors.into_result()?;

    // A concurrent registration can still win the race; the store reports
    // that as StoreError::Duplicate.
    let password_hash = hash_password(&valid.password)?;
    let user = store
        .create(&NewUser {
            username: valid.username,
            email: valid.email,
            password_hash,
            first_name: valid.first_name,
            last_name: valid.last_name,
            role: valid.role,
        })
        .await?;
    let token = store.get_or_create_token(user.id, &generate_token_key()).await?;

    info!(user_id = user.id, username = %user.username, role = %user.role, "user registered");
    Ok((user, token))
}

/// Check credentials and issue-or-reuse the user's token. Unknown accounts
/// and wrong passwords fail identically.
#[instrument(skip(store, req))]
pub async fn authenticate(
    store: &dyn UserStore,
    req: LoginRequest,
) -> AppResult<(User, AuthToken)> {
    let (identifier, password) = validate_login(req).map_err(AppError::Validation)?;

    let found = match &identifier {
        LoginIdentifier::Username(username) => store.find_by_username(username).await?,
        LoginIdentifier::Email(email) => store.find_by_email(email).await?,
    };
    let Some(user) = found else {
        warn!(identifier = ?identifier, "login unknown account");
        return Err(AppError::InvalidCredentials);
    };

    if !verify_password(&password, &user.password_hash)? {
        warn!(user_id = user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    let token = store.get_or_create_token(user.id, &generate_token_key()).await?;
    info!(user_id = user.id, "user logged in");
    Ok((user, token))
}
