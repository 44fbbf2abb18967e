//! `${VAR}` expansion for string settings.

use crate::ConfigError;

/// Expand `${VAR}` and `${VAR:-default}` references in `value`.
///
/// An unset variable without a default is an error naming `field`. Bare
/// `$VAR` is left alone so URLs containing `$` survive unchanged.
pub(crate) fn expand_env(value: &str, field: &str) -> Result<String, ConfigError> {
    if !value.contains("${") {
        return Ok(value.to_owned());
    }

    shellexpand::env_with_context(value, |name| match std::env::var(name) {
        Ok(found) => Ok(Some(found)),
        Err(_) => Err(UnsetVar(name.to_owned())),
    })
    .map(std::borrow::Cow::into_owned)
    .map_err(|err| ConfigError::EnvVar {
        field: field.to_owned(),
        message: format!("${{{}}} not set", err.cause.0),
    })
}

/// Lookup failure carrying the variable name.
struct UnsetVar(String);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expand_set_var() {
        // SAFETY: variable name is unique to this test
        unsafe {
            std::env::set_var("LR_EXPAND_HOST", "0.0.0.0");
        }
        assert_eq!(expand_env("${LR_EXPAND_HOST}", "server.host").unwrap(), "0.0.0.0");
        unsafe {
            std::env::remove_var("LR_EXPAND_HOST");
        }
    }

    #[test]
    fn test_expand_default_when_unset() {
        // SAFETY: variable name is unique to this test
        unsafe {
            std::env::remove_var("LR_EXPAND_UNSET");
        }
        assert_eq!(
            expand_env("http://${LR_EXPAND_UNSET:-localhost}:8080", "upstream.proxy").unwrap(),
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_expand_unset_without_default_fails() {
        // SAFETY: variable name is unique to this test
        unsafe {
            std::env::remove_var("LR_EXPAND_MISSING");
        }
        let err = expand_env("${LR_EXPAND_MISSING}", "upstream.proxy").unwrap_err();
        assert!(matches!(err, ConfigError::EnvVar { .. }));
        let message = err.to_string();
        assert!(message.contains("LR_EXPAND_MISSING"), "{message}");
        assert!(message.contains("upstream.proxy"), "{message}");
    }

    #[test]
    fn test_bare_dollar_kept() {
        assert_eq!(
            expand_env("http://example.com/$path", "upstream.proxy").unwrap(),
            "http://example.com/$path"
        );
    }
}
