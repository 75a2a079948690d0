use thiserror::Error;

use crate::models::ExpiryConfig;

const MIN_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("watch list path {0} is a directory")]
    WatchListIsDirectory(String),
    #[error("default folder {0} exists but is not a directory")]
    DefaultFolderNotADirectory(String),
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Reject unusable paths and clamp values the runtime cannot honor.
pub fn apply_guard_rails(
    config: &mut ExpiryConfig,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if let Some(path) = &config.storage.watch_list_path
        && path.is_dir()
    {
        return Err(ConfigGuardRailError::WatchListIsDirectory(
            path.display().to_string(),
        ));
    }

    if let Some(folder) = &config.default_folder
        && folder.exists()
        && !folder.is_dir()
    {
        return Err(ConfigGuardRailError::DefaultFolderNotADirectory(
            folder.display().to_string(),
        ));
    }

    if config.watch.poll_interval_ms < MIN_POLL_INTERVAL_MS {
        warnings.push_with_hint(
            format!(
                "watch.poll_interval_ms = {} is too small; using {}",
                config.watch.poll_interval_ms, MIN_POLL_INTERVAL_MS
            ),
            "Polling re-lists every watched folder on each tick",
        );
        config.watch.poll_interval_ms = MIN_POLL_INTERVAL_MS;
    }

    if config.sweep.interval_secs == 0 {
        warnings.push("sweep.interval_secs = 0 is not a schedule; using 1");
        config.sweep.interval_secs = 1;
    }

    if config.sweep.expiring_soon_secs == 0 {
        warnings.push_with_hint(
            "sweep.expiring_soon_secs = 0; no file will be reported as expiring soon",
            "Set a threshold such as 3600 to be warned an hour ahead",
        );
    }

    if config.expiring_list_limit == 0 {
        warnings.push(format!(
            "expiring_list_limit = 0 hides every file; using {}",
            expiry_core::DEFAULT_EXPIRING_LIMIT
        ));
        config.expiring_list_limit = expiry_core::DEFAULT_EXPIRING_LIMIT;
    }

    if config.event_capacity == 0 {
        warnings.push("event_capacity = 0; using 1");
        config.event_capacity = 1;
    }

    if let Some(folder) = &config.default_folder
        && folder.is_relative()
    {
        warnings.push_with_hint(
            format!(
                "default_folder {} is relative and will resolve against the working directory",
                folder.display()
            ),
            "Use an absolute path",
        );
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn defaults_pass_cleanly() {
        let mut config = ExpiryConfig::default();
        let warnings = apply_guard_rails(&mut config).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(config, ExpiryConfig::default());
    }

    #[test]
    fn zero_values_are_clamped_with_warnings() {
        let mut config = ExpiryConfig::default();
        config.watch.poll_interval_ms = 0;
        config.sweep.interval_secs = 0;
        config.expiring_list_limit = 0;
        config.event_capacity = 0;

        let warnings = apply_guard_rails(&mut config).unwrap();
        assert_eq!(warnings.len(), 4);
        assert_eq!(config.watch.poll_interval_ms, MIN_POLL_INTERVAL_MS);
        assert_eq!(config.sweep.interval_secs, 1);
        assert_eq!(config.expiring_list_limit, 5);
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn relative_default_folder_warns() {
        let mut config = ExpiryConfig {
            default_folder: Some(PathBuf::from("does-not-exist-inbox")),
            ..ExpiryConfig::default()
        };
        let warnings = apply_guard_rails(&mut config).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings.items[0].hint.is_some());
    }
}
