use std::path::PathBuf;

/// Well-known filesystem locations. Cookie records live under the per-user
/// base directory; the login signal file and per-launch browser profiles
/// are transient and live in the system temp directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".authshot"))
            .unwrap_or_else(|| PathBuf::from(".authshot"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn cookies_dir(&self) -> PathBuf {
        self.base.join("cookies")
    }

    /// Marker file written by `signal-login-complete` and consumed by the
    /// login-wait watcher. Shared, well-known location in the system temp dir.
    pub fn login_signal_file(&self) -> PathBuf {
        std::env::temp_dir().join("authshot-login-complete")
    }

    /// Freshly named profile directory for one system-browser launch.
    /// The session owns it and removes it on close.
    pub fn new_profile_dir(&self) -> PathBuf {
        std::env::temp_dir().join(format!("authshot-profile-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_layout() {
        let paths = Paths::with_base(PathBuf::from("/tmp/authshot-test"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/authshot-test/config.json"));
        assert_eq!(paths.cookies_dir(), PathBuf::from("/tmp/authshot-test/cookies"));
    }

    #[test]
    fn test_signal_file_in_temp_dir() {
        let paths = Paths::new();
        assert!(paths.login_signal_file().starts_with(std::env::temp_dir()));
    }

    #[test]
    fn test_profile_dirs_unique() {
        let paths = Paths::new();
        assert_ne!(paths.new_profile_dir(), paths.new_profile_dir());
    }
}
