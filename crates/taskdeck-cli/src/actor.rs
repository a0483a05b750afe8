//! Acting user and current project resolution for CLI commands.
//!
//! User chain: `--user` flag > `TASKDECK_USER` env > `user` in the user config.
//! Project chain: `--project` flag > `TASKDECK_PROJECT` env > the selection
//! saved by `td project use`.
//!
//! Commands that touch tasks or projects require a user; `init`,
//! `user add`, and `completions` work without one.

use std::env;

use taskdeck_core::error::TaskDeckError;

pub const USER_ENV: &str = "TASKDECK_USER";
pub const PROJECT_ENV: &str = "TASKDECK_PROJECT";

/// Environment reader trait for dependency injection in tests.
trait EnvReader {
    fn get(&self, key: &str) -> Option<String>;
}

/// Real environment reader.
struct RealEnv;

impl EnvReader for RealEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

fn first_non_empty<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn resolve_user_with(
    cli_flag: Option<&str>,
    configured: Option<&str>,
    env: &dyn EnvReader,
) -> Option<String> {
    let from_env = env.get(USER_ENV);
    first_non_empty([cli_flag, from_env.as_deref(), configured])
}

fn resolve_project_with(
    cli_flag: Option<&str>,
    saved: Option<&str>,
    env: &dyn EnvReader,
) -> Option<String> {
    let from_env = env.get(PROJECT_ENV);
    first_non_empty([cli_flag, from_env.as_deref(), saved])
}

/// Resolve the acting user id, or `None` when no source names one.
pub fn resolve_user(cli_flag: Option<&str>, configured: Option<&str>) -> Option<String> {
    resolve_user_with(cli_flag, configured, &RealEnv)
}

/// Resolve the acting user id, failing with `NotAuthenticated` when unset.
///
/// # Errors
///
/// Returns [`TaskDeckError::NotAuthenticated`] when no source names a user.
pub fn require_user(
    cli_flag: Option<&str>,
    configured: Option<&str>,
) -> Result<String, TaskDeckError> {
    resolve_user(cli_flag, configured).ok_or_else(|| {
        TaskDeckError::NotAuthenticated(format!(
            "no user given; pass --user or set {USER_ENV}"
        ))
    })
}

/// Resolve the requested project (id or join code), if any.
pub fn resolve_project(cli_flag: Option<&str>, saved: Option<&str>) -> Option<String> {
    resolve_project_with(cli_flag, saved, &RealEnv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Test environment reader with configurable values.
    struct MockEnv {
        vars: HashMap<String, String>,
    }

    impl MockEnv {
        fn new() -> Self {
            Self {
                vars: HashMap::new(),
            }
        }

        fn var(mut self, key: &str, val: &str) -> Self {
            self.vars.insert(key.to_string(), val.to_string());
            self
        }
    }

    impl EnvReader for MockEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).filter(|v| !v.trim().is_empty()).cloned()
        }
    }

    #[test]
    fn cli_flag_takes_priority() {
        let env = MockEnv::new().var(USER_ENV, "u-env");
        let result = resolve_user_with(Some("u-flag"), Some("u-config"), &env);
        assert_eq!(result.as_deref(), Some("u-flag"));
    }

    #[test]
    fn env_beats_config() {
        let env = MockEnv::new().var(USER_ENV, "u-env");
        let result = resolve_user_with(None, Some("u-config"), &env);
        assert_eq!(result.as_deref(), Some("u-env"));
    }

    #[test]
    fn config_is_the_last_resort() {
        let env = MockEnv::new();
        assert_eq!(
            resolve_user_with(None, Some("u-config"), &env).as_deref(),
            Some("u-config")
        );
        assert_eq!(resolve_user_with(None, None, &env), None);
    }

    #[test]
    fn blank_values_are_skipped() {
        let env = MockEnv::new().var(USER_ENV, "  ");
        let result = resolve_user_with(Some(""), Some(" u-config "), &env);
        assert_eq!(result.as_deref(), Some("u-config"));
    }

    #[test]
    fn project_chain_order() {
        let env = MockEnv::new().var(PROJECT_ENV, "PRJ-ENV");
        assert_eq!(
            resolve_project_with(Some("PRJ-FLAG"), Some("p-saved"), &env).as_deref(),
            Some("PRJ-FLAG")
        );
        assert_eq!(
            resolve_project_with(None, Some("p-saved"), &env).as_deref(),
            Some("PRJ-ENV")
        );
        assert_eq!(
            resolve_project_with(None, Some("p-saved"), &MockEnv::new()).as_deref(),
            Some("p-saved")
        );
    }

    #[test]
    fn require_user_succeeds_with_flag() {
        assert_eq!(require_user(Some("u-1"), None).unwrap(), "u-1");
    }

    #[test]
    fn missing_user_error_names_the_env_var() {
        let err = resolve_user_with(None, None, &MockEnv::new())
            .ok_or_else(|| TaskDeckError::NotAuthenticated(format!("set {USER_ENV}")))
            .unwrap_err();
        assert!(err.to_string().contains(USER_ENV));
        assert_eq!(err.code().code(), "E1003");
    }
}
