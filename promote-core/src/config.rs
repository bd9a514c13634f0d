use crate::error::AnalyzeError;
use regex::Regex;
use std::time::{Duration, Instant};

pub const DEFAULT_SCAN_WINDOW: usize = 50;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Squash commits as GitHub and GitLab title them: "Title (#123)", or any
/// message that says so.
pub const DEFAULT_SQUASH_PATTERN: &str = r"(?i)squash|\(#\d+\)\s*$";

/// Tunables of one analysis run
#[derive(Debug, Clone)]
pub struct AnalyzeConfig {
    /// Regex a sync-marker message must match. `None` derives one from the
    /// downstream stage name.
    pub marker_pattern: Option<String>,
    /// Merge commits inspected before the locator gives up
    pub scan_window: usize,
    /// Wall-clock budget for the whole pipeline
    pub timeout: Duration,
    /// Regex identifying squash commits on the downstream stage
    pub squash_pattern: String,
    /// Upper bound on concurrent verification workers
    pub max_workers: usize,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            marker_pattern: None,
            scan_window: DEFAULT_SCAN_WINDOW,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            squash_pattern: DEFAULT_SQUASH_PATTERN.to_string(),
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl AnalyzeConfig {
    pub fn validate(&self) -> Result<(), AnalyzeError> {
        if self.scan_window == 0 {
            return Err(AnalyzeError::InvalidConfig(
                "scan window must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(AnalyzeError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(AnalyzeError::InvalidConfig(
                "at least one verification worker is required".to_string(),
            ));
        }
        if let Some(pattern) = &self.marker_pattern {
            compile("marker pattern", pattern)?;
        }
        compile("squash pattern", &self.squash_pattern)?;
        Ok(())
    }

    pub fn squash_regex(&self) -> Result<Regex, AnalyzeError> {
        compile("squash pattern", &self.squash_pattern)
    }
}

pub(crate) fn compile(what: &str, pattern: &str) -> Result<Regex, AnalyzeError> {
    Regex::new(pattern)
        .map_err(|e| AnalyzeError::InvalidConfig(format!("{what} '{pattern}': {e}")))
}

/// Point in time after which the pipeline stops
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn check(&self) -> Result<(), AnalyzeError> {
        if Instant::now() >= self.at {
            return Err(AnalyzeError::Timeout(self.budget));
        }
        Ok(())
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AnalyzeConfig::default();
        assert_eq!(config.scan_window, 50);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = AnalyzeConfig {
            scan_window: 0,
            ..AnalyzeConfig::default()
        };
        assert!(matches!(config.validate(), Err(AnalyzeError::InvalidConfig(_))));

        let config = AnalyzeConfig {
            marker_pattern: Some("merge (".to_string()),
            ..AnalyzeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("marker pattern"));

        let config = AnalyzeConfig {
            timeout: Duration::ZERO,
            ..AnalyzeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_squash_pattern() {
        let squash = AnalyzeConfig::default().squash_regex().unwrap();
        assert!(squash.is_match("Promote staging to main (#42)"));
        assert!(squash.is_match("Squashed commit of the following"));
        assert!(!squash.is_match("Fix flaky test"));
    }

    #[test]
    fn test_deadline_expires() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(matches!(deadline.check(), Err(AnalyzeError::Timeout(_))));
        assert!(Deadline::after(Duration::from_secs(60)).check().is_ok());
    }
}
