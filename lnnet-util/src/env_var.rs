use std::env;
use std::path::PathBuf;

use crate::config::DEFAULT_RUNTIME_DIR;

/// The value of an environment variable, treating blank values as unset
pub fn non_empty_env(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// Root of all runtime state (`RUNTIME_DIR`)
pub fn runtime_dir() -> PathBuf {
    non_empty_env("RUNTIME_DIR").map(PathBuf::from).unwrap_or(PathBuf::from(DEFAULT_RUNTIME_DIR))
}

/// Parent of the per-node lightning dirs (`LIGHTNING_BASE`)
pub fn lightning_base() -> PathBuf {
    non_empty_env("LIGHTNING_BASE")
        .map(PathBuf::from)
        .unwrap_or_else(|| runtime_dir().join("lightning"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // the only test touching these variables, tests run in parallel
    #[test]
    fn runtime_layout_test() {
        env::set_var("RUNTIME_DIR", " /tmp/lnnet-rt ");
        env::remove_var("LIGHTNING_BASE");
        assert_eq!(runtime_dir(), PathBuf::from("/tmp/lnnet-rt"));
        assert_eq!(lightning_base(), PathBuf::from("/tmp/lnnet-rt/lightning"));

        env::set_var("LIGHTNING_BASE", "/srv/ln");
        assert_eq!(lightning_base(), PathBuf::from("/srv/ln"));

        env::set_var("RUNTIME_DIR", "   ");
        assert_eq!(runtime_dir(), PathBuf::from(DEFAULT_RUNTIME_DIR));
        assert_eq!(non_empty_env("LNNET_TEST_SURELY_UNSET"), None);
        env::remove_var("RUNTIME_DIR");
        env::remove_var("LIGHTNING_BASE");
    }
}
