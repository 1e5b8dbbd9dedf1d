//! Authentication hook for administrators.
//!
//! Tetriforge doesn't store credentials. The server calls an
//! [`AdminAuthenticator`] during `admin_connect`; what it checks against
//! (a config value, a vault, an LDAP bind) is the embedder's choice.
//!
//! # Example
//!
//! ```rust
//! use tetriforge_session::{AdminAuthenticator, SessionError};
//!
//! /// Only lets "root" in, whatever the password.
//! struct RootOnly;
//!
//! impl AdminAuthenticator for RootOnly {
//!     fn authenticate(&self, name: &str, _password: &str) -> Result<(), SessionError> {
//!         if name == "root" {
//!             Ok(())
//!         } else {
//!             Err(SessionError::AuthFailed(format!("{name} is not root")))
//!         }
//!     }
//! }
//! ```

use crate::SessionError;

/// Validates an administrator's credentials.
///
/// Synchronous and object-safe: the server stores it as
/// `Arc<dyn AdminAuthenticator>` and calls it while holding no lock.
pub trait AdminAuthenticator: Send + Sync + 'static {
    fn authenticate(&self, name: &str, password: &str) -> Result<(), SessionError>;
}

/// Accepts any admin name with one shared password.
#[derive(Debug, Clone)]
pub struct PasswordAuthenticator {
    password: String,
}

impl PasswordAuthenticator {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl AdminAuthenticator for PasswordAuthenticator {
    fn authenticate(&self, name: &str, password: &str) -> Result<(), SessionError> {
        if password == self.password {
            Ok(())
        } else {
            Err(SessionError::AuthFailed(format!("wrong password for {name}")))
        }
    }
}

/// Refuses every administrator. The default when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl AdminAuthenticator for DenyAll {
    fn authenticate(&self, name: &str, _password: &str) -> Result<(), SessionError> {
        Err(SessionError::AuthFailed(format!(
            "admin access disabled ({name})"
        )))
    }
}
