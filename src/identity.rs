//! Signing identity resolution.
//!
//! Every completion names who signed it off. Rather than requiring `--as` on
//! every invocation, identity is resolved through a chain:
//!
//! 1. `--as <identity>`: explicit per-command override
//! 2. `TRB_IDENTITY` env var: set once per session, e.g. on the ship's terminal
//! 3. `default-identity` in `~/.trb/config.toml`

use std::env;

use crate::config::Config;
use crate::storage::{Error, Result};

/// Environment variable holding the session identity.
pub const IDENTITY_ENV: &str = "TRB_IDENTITY";

/// Error message shown when identity cannot be resolved.
pub const IDENTITY_REQUIRED: &str = "identity required: pass --as <identity>, \
    set TRB_IDENTITY, or add `default-identity = \"...\"` to ~/.trb/config.toml";

/// Resolve the signing identity from the chain.
pub fn resolve_identity(explicit: Option<&str>, config: &Config) -> Result<String> {
    let from_env = env::var(IDENTITY_ENV).ok();
    resolve(explicit, from_env.as_deref(), config.default_identity.as_deref())
}

fn resolve(explicit: Option<&str>, from_env: Option<&str>, configured: Option<&str>) -> Result<String> {
    [explicit, from_env, configured]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(String::from)
        .ok_or_else(|| Error::Validation(IDENTITY_REQUIRED.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_wins() {
        let id = resolve(Some("Master"), Some("Chief Officer"), Some("Bosun")).unwrap();
        assert_eq!(id, "Master");
    }

    #[test]
    fn env_before_config() {
        let id = resolve(None, Some("Chief Officer"), Some("Bosun")).unwrap();
        assert_eq!(id, "Chief Officer");
    }

    #[test]
    fn empty_values_fall_through() {
        let id = resolve(Some(""), Some("  "), Some("Bosun")).unwrap();
        assert_eq!(id, "Bosun");
    }

    #[test]
    fn nothing_configured_is_an_error() {
        let err = resolve(None, None, None).unwrap_err();
        assert!(err.to_string().contains("identity required"));
    }
}
