//! Provider and search API keys.

use std::env;
use std::fmt;

use secrecy::{ExposeSecret, SecretBox};

/// An API key that formats as `[REDACTED]`, optionally remembering which
/// environment variable it came from so logs can name it.
pub struct SecretString {
    value: SecretBox<str>,
    origin: Option<String>,
}

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        let value: String = value.into();
        Self {
            value: SecretBox::new(value.trim().into()),
            origin: None,
        }
    }

    /// Key from `var`; unset or blank gives `None`.
    pub fn from_env(var: &str) -> Option<Self> {
        let raw = env::var(var).ok().filter(|v| !v.trim().is_empty())?;
        let mut key = Self::new(raw);
        key.origin = Some(var.to_string());
        Some(key)
    }

    /// Environment variable the key was read from.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    /// For request headers and client construction only.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self {
            value: SecretBox::new(self.expose().into()),
            origin: self.origin.clone(),
        }
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(var) => write!(f, "[REDACTED from {}]", var),
            None => f.write_str("[REDACTED]"),
        }
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
