//! Channel-name validation and test-run namespacing
//!
//! A channel name maps 1:1 onto a segment name, two semaphore names
//! (`sem-w-<name>`, `sem-r-<name>`), and a lock file. The namespacing
//! service decorates logical names with a `(host_pid, feature_id)` pair so
//! parallel test runs on one machine cannot collide.

use crate::error::{BufferError, BufferResult};

/// Maximum channel name length in bytes.
pub const MAX_CHANNEL_NAME_LEN: usize = 255;

/// Environment variable carrying the orchestrating host's PID.
pub const ENV_HOST_PID: &str = "HARMONY_HOST_PID";

/// Environment variable carrying the feature identifier of the current run.
pub const ENV_FEATURE_ID: &str = "HARMONY_FEATURE_ID";

/// Validate a channel name: printable, no path separators, no whitespace,
/// non-empty, at most [`MAX_CHANNEL_NAME_LEN`] bytes. Case-sensitive.
pub fn validate_channel_name(name: &str) -> BufferResult<()> {
    let fail = |reason| {
        Err(BufferError::InvalidChannelName {
            name: name.to_string(),
            reason,
        })
    };
    if name.is_empty() {
        return fail("empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return fail("longer than 255 bytes");
    }
    for c in name.chars() {
        if c == '/' || c == '\\' {
            return fail("contains a path separator");
        }
        if c.is_whitespace() {
            return fail("contains whitespace");
        }
        if c.is_control() {
            return fail("contains a control character");
        }
    }
    Ok(())
}

/// Derive the writer-wakeup semaphore name for a channel.
pub fn sem_write_name(channel: &str) -> String {
    format!("sem-w-{channel}")
}

/// Derive the reader-wakeup semaphore name for a channel.
pub fn sem_read_name(channel: &str) -> String {
    format!("sem-r-{channel}")
}

/// Namespaces logical channel names by `(host_pid, feature_id)`.
///
/// Servo processes construct this from the environment; tests inject
/// explicit values. With neither component present, names pass through
/// unchanged.
#[derive(Debug, Clone, Default)]
pub struct BufferNamingService {
    host_pid: Option<String>,
    feature_id: Option<String>,
}

impl BufferNamingService {
    /// Build from `HARMONY_HOST_PID` / `HARMONY_FEATURE_ID`.
    pub fn from_env() -> Self {
        Self {
            host_pid: std::env::var(ENV_HOST_PID).ok().filter(|v| !v.is_empty()),
            feature_id: std::env::var(ENV_FEATURE_ID).ok().filter(|v| !v.is_empty()),
        }
    }

    /// Build with explicit components.
    pub fn new(host_pid: Option<String>, feature_id: Option<String>) -> Self {
        Self {
            host_pid,
            feature_id,
        }
    }

    /// Map a logical channel name to its namespaced form and validate it.
    pub fn resolve(&self, name: &str) -> BufferResult<String> {
        validate_channel_name(name)?;
        let resolved = match (&self.host_pid, &self.feature_id) {
            (Some(host), Some(feature)) => format!("{name}-{host}-{feature}"),
            (Some(host), None) => format!("{name}-{host}"),
            (None, Some(feature)) => format!("{name}-{feature}"),
            (None, None) => return Ok(name.to_string()),
        };
        validate_channel_name(&resolved)?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(validate_channel_name("video-frames").is_ok());
        assert!(validate_channel_name("a").is_ok());
        assert!(validate_channel_name("UPPER_and_lower.123").is_ok());
        assert!(validate_channel_name(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn invalid_names() {
        for bad in ["", "a/b", "a\\b", "a b", "a\tb", "a\nb", "\u{7}bell"] {
            assert!(
                matches!(
                    validate_channel_name(bad),
                    Err(BufferError::InvalidChannelName { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_channel_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn semaphore_names() {
        assert_eq!(sem_write_name("cam0"), "sem-w-cam0");
        assert_eq!(sem_read_name("cam0"), "sem-r-cam0");
    }

    #[test]
    fn resolve_namespacing() {
        let plain = BufferNamingService::new(None, None);
        assert_eq!(plain.resolve("cam0").unwrap(), "cam0");

        let full = BufferNamingService::new(Some("1234".into()), Some("feat-9".into()));
        assert_eq!(full.resolve("cam0").unwrap(), "cam0-1234-feat-9");

        let host_only = BufferNamingService::new(Some("1234".into()), None);
        assert_eq!(host_only.resolve("cam0").unwrap(), "cam0-1234");
    }

    #[test]
    fn resolve_rejects_bad_logical_name() {
        let svc = BufferNamingService::new(Some("1".into()), Some("2".into()));
        assert!(svc.resolve("has space").is_err());
    }
}
