pub mod string;

pub use string::SecretString;

use sdk::errors::CarrierError;

/// Read a store token from the environment variable `var`.
///
/// Tokens never live in the config file; the config only names the variable.
pub fn token_from_env(var: &str) -> Result<SecretString, CarrierError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretString::new(value.trim())),
        _ => Err(CarrierError::Config(format!(
            "Token variable '{}' is not set",
            var
        ))),
    }
}

/// Replace every occurrence of the given secrets in `text` with `[REDACTED]`.
///
/// Used on messages from external collaborators before they are logged.
pub fn scrub(text: &str, secrets: &[&SecretString]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(text.to_string(), |acc, s| acc.replace(s.unsecure(), "[REDACTED]"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrub_removes_tokens() {
        let token = SecretString::new("hvs.abc123");
        let scrubbed = scrub("login with hvs.abc123 failed", &[&token]);
        assert_eq!(scrubbed, "login with [REDACTED] failed");
    }

    #[test]
    fn test_scrub_ignores_empty_secrets() {
        let empty = SecretString::default();
        assert_eq!(scrub("unchanged", &[&empty]), "unchanged");
    }

    #[test]
    fn test_missing_token_variable() {
        let result = token_from_env("CARRIER_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(matches!(result, Err(CarrierError::Config(_))));
    }
}
