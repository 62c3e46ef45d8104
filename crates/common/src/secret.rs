//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use them for the
//! relay-credential provider secret and any other value that must never show
//! up in logs or `Debug` output.
//!
//! `SecretString` implements `Debug` with redaction, so a struct deriving
//! `Debug` that holds one is safe to log.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ProviderCredentials {
//!     username: String,
//!     secret: SecretString,
//! }
//!
//! let creds = ProviderCredentials {
//!     username: "mesh".to_string(),
//!     secret: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("hunter2"));
//! let secret: &str = creds.secret.expose_secret();
//! assert_eq!(secret, "hunter2");
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("password123");
        assert_eq!(secret.expose_secret(), "password123");
    }

    #[test]
    fn test_deserialize_provider_credentials() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct ProviderCredentials {
            username: String,
            secret: SecretString,
        }

        let json = r#"{"username": "mesh", "secret": "turn-secret-value"}"#;
        let creds: ProviderCredentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.secret.expose_secret(), "turn-secret-value");

        let debug = format!("{creds:?}");
        assert!(!debug.contains("turn-secret-value"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_clone_works() {
        let secret = SecretString::from("cloneable");
        let cloned = secret.clone();
        assert_eq!(cloned.expose_secret(), "cloneable");
    }
}
