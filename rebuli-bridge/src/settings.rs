use std::collections::BTreeSet;
use std::convert::Infallible;
use std::str::FromStr;
use std::time::Duration;

use rebuli_core::DeviceId;
use serde::Serialize;

/// Default delay before a self-resetting binary device falls back to off.
pub const DEFAULT_AUTO_OFF_TIMEOUT: Duration = Duration::from_secs(2);

/// Runtime settings the pipeline consults for every message.
///
/// They are published through a `tokio::sync::watch` channel so a reload
/// takes effect on the next message without restarting the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub allowed_ids: AllowList,
    pub auto_off_timeout: Duration,
    pub platform_retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allowed_ids: AllowList::default(),
            auto_off_timeout: DEFAULT_AUTO_OFF_TIMEOUT,
            platform_retry: RetryPolicy::default(),
        }
    }
}

/// Set of device ids (four uppercase hex digits) the bridge accepts.
///
/// An empty list accepts every device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllowList(BTreeSet<String>);

impl AllowList {
    pub fn allows(&self, device_id: DeviceId) -> bool {
        self.0.is_empty() || self.0.contains(&device_id.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for AllowList {
    /// Entries are trimmed and uppercased; blank entries are dropped.
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|id| id.as_ref().trim().to_uppercase())
                .filter(|id| !id.is_empty())
                .collect(),
        )
    }
}

impl FromStr for AllowList {
    type Err = Infallible;

    /// Parses a comma separated list such as `"0a1b, 0A1C"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.split(',').collect())
    }
}

/// Bounded retry used while waiting for the entity platform to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_accepts_everything() {
        let allowed = AllowList::default();
        assert!(allowed.allows(DeviceId(0)));
        assert!(allowed.allows(DeviceId(0xFFFF)));
    }

    #[test]
    fn allow_list_matches_exact_ids() {
        let allowed: AllowList = ["0A1B"].into_iter().collect();
        assert!(allowed.allows(DeviceId(0x0A1B)));
        assert!(!allowed.allows(DeviceId(0x0A1C)));
    }

    #[test]
    fn allow_list_normalises_input() {
        let allowed: AllowList = " 0a1b, ,beef,0A1B ".parse().unwrap();
        assert_eq!(allowed.iter().collect::<Vec<_>>(), vec!["0A1B", "BEEF"]);
        assert!(allowed.allows(DeviceId(0xBEEF)));
    }
}
