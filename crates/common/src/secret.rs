//! Secret wrapper for sensitive values

use std::fmt;
use std::path::Path;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Resolve a secret from an environment variable or a file.
    ///
    /// The env var wins when set. Otherwise the file (if configured) is read
    /// and trimmed; whitespace-only content resolves to `None`. A configured
    /// file that cannot be read is a configuration error.
    pub fn resolve(env_var: &str, file: Option<&Path>) -> Result<Option<Self>> {
        if let Ok(value) = std::env::var(env_var) {
            let value = value.trim().to_owned();
            if !value.is_empty() {
                return Ok(Some(Self::new(value)));
            }
        }

        let Some(file) = file else {
            return Ok(None);
        };

        let contents = std::fs::read_to_string(file).map_err(|e| {
            Error::Config(format!("failed to read secret file {}: {e}", file.display()))
        })?;
        let value = contents.trim().to_owned();
        if value.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::new(value)))
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_secret_redacts_debug() {
        let secret = Secret::new(String::from("client-secret-value"));
        let debug = format!("{:?}", secret);
        assert_eq!(debug, "[REDACTED]");
        assert!(!debug.contains("client-secret-value"));
        assert_eq!(secret.to_string(), "[REDACTED]");
    }

    #[test]
    fn test_secret_exposes_value() {
        let secret = Secret::new(String::from("client-secret-value"));
        assert_eq!(secret.expose(), "client-secret-value");
    }

    #[test]
    fn resolve_prefers_env_over_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("secret");
        std::fs::write(&file, "from-file").unwrap();

        unsafe { std::env::set_var("COMMON_TEST_SECRET_A", "from-env") };
        let secret = Secret::resolve("COMMON_TEST_SECRET_A", Some(&file))
            .unwrap()
            .unwrap();
        assert_eq!(secret.expose(), "from-env");
        unsafe { std::env::remove_var("COMMON_TEST_SECRET_A") };
    }

    #[test]
    fn resolve_reads_trimmed_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("secret");
        std::fs::write(&file, "  from-file\n").unwrap();

        let secret = Secret::resolve("COMMON_TEST_SECRET_B", Some(&file))
            .unwrap()
            .unwrap();
        assert_eq!(secret.expose(), "from-file");
    }

    #[test]
    fn resolve_whitespace_file_is_none() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("secret");
        std::fs::write(&file, " \n ").unwrap();

        assert!(
            Secret::resolve("COMMON_TEST_SECRET_C", Some(&file))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn resolve_missing_file_is_config_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let result = Secret::resolve(
            "COMMON_TEST_SECRET_D",
            Some(Path::new("/nonexistent/secret")),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn resolve_nothing_configured_is_none() {
        let _lock = ENV_MUTEX.lock().unwrap();
        assert!(Secret::resolve("COMMON_TEST_SECRET_E", None).unwrap().is_none());
    }
}
