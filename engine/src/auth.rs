//! Credential providers for backends with expiring credentials.

use std::fmt;

use crate::error::AuthenticationFailure;

/// A storage credential set.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Credentials {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Produces a credential set on demand.
pub trait Authenticator: Send + Sync {
    fn credentials(&self) -> Result<Credentials, AuthenticationFailure>;
}

/// Fixed credentials supplied up front.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        StaticCredentials { credentials }
    }
}

impl Authenticator for StaticCredentials {
    fn credentials(&self) -> Result<Credentials, AuthenticationFailure> {
        Ok(self.credentials.clone())
    }
}

/// Credentials read from the process environment at each refresh.
///
/// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
/// `AWS_SESSION_TOKEN`, so a rotated token is picked up by the next run.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    pub const ACCESS_KEY_VAR: &'static str = "AWS_ACCESS_KEY_ID";
    pub const SECRET_KEY_VAR: &'static str = "AWS_SECRET_ACCESS_KEY";
    pub const SESSION_TOKEN_VAR: &'static str = "AWS_SESSION_TOKEN";

    pub fn new() -> Self {
        EnvCredentials
    }

    fn require(name: &str) -> Result<String, AuthenticationFailure> {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(AuthenticationFailure::new(
                format!("{} is not set", name),
                "ReadEnvironment",
            )),
        }
    }
}

impl Authenticator for EnvCredentials {
    fn credentials(&self) -> Result<Credentials, AuthenticationFailure> {
        let mut credentials = Credentials::new(
            Self::require(Self::ACCESS_KEY_VAR)?,
            Self::require(Self::SECRET_KEY_VAR)?,
        );
        if let Ok(token) = std::env::var(Self::SESSION_TOKEN_VAR) {
            if !token.is_empty() {
                credentials = credentials.with_session_token(token);
            }
        }
        Ok(credentials)
    }
}
