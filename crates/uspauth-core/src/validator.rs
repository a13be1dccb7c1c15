//! Credential usability classification.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::credential::Credential;

/// Default share of a credential's lifetime used as the refresh lookahead.
const DEFAULT_LOOKAHEAD_RATIO: f64 = 0.10;

/// Default minimum lookahead window (5 minutes).
const DEFAULT_LOOKAHEAD_FLOOR_SECS: i64 = 300;

/// When to treat a credential as due for proactive refresh.
///
/// The lookahead window is the larger of `lookahead_ratio` of the credential's
/// lifetime and `lookahead_floor_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    pub lookahead_ratio: f64,
    pub lookahead_floor_secs: i64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            lookahead_ratio: DEFAULT_LOOKAHEAD_RATIO,
            lookahead_floor_secs: DEFAULT_LOOKAHEAD_FLOOR_SECS,
        }
    }
}

impl RefreshPolicy {
    /// A fixed window with no lifetime-proportional component.
    pub fn fixed_window(window: Duration) -> Self {
        Self {
            lookahead_ratio: 0.0,
            lookahead_floor_secs: window.num_seconds(),
        }
    }

    /// Lookahead window for a credential with the given lifetime.
    pub fn window_for(&self, lifetime: Duration) -> Duration {
        let proportional_ms = (lifetime.num_milliseconds() as f64 * self.lookahead_ratio) as i64;
        let proportional = Duration::milliseconds(proportional_ms.max(0));
        let floor = saturating_seconds(self.lookahead_floor_secs.max(0));
        proportional.max(floor)
    }
}

/// `secs` as a `Duration`, clamped to the representable range.
pub(crate) fn saturating_seconds(secs: i64) -> Duration {
    Duration::try_seconds(secs).unwrap_or(if secs < 0 { Duration::MIN } else { Duration::MAX })
}

/// Usability of a credential at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Valid,
    ExpiringSoon { within: Duration },
    Expired,
}

impl Classification {
    /// 0 = Valid, 1 = ExpiringSoon, 2 = Expired. Never decreases over time.
    pub fn severity(&self) -> u8 {
        match self {
            Classification::Valid => 0,
            Classification::ExpiringSoon { .. } => 1,
            Classification::Expired => 2,
        }
    }

    /// Still accepted by resource servers (not yet past expiry).
    pub fn is_usable(&self) -> bool {
        !matches!(self, Classification::Expired)
    }

    pub fn needs_refresh(&self) -> bool {
        !matches!(self, Classification::Valid)
    }
}

/// Pure classification of credentials against a `RefreshPolicy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenValidator {
    policy: RefreshPolicy,
}

impl TokenValidator {
    pub fn new(policy: RefreshPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    pub fn classify(&self, credential: &Credential, now: DateTime<Utc>) -> Classification {
        let remaining = credential.remaining(now);
        if remaining <= Duration::zero() {
            return Classification::Expired;
        }
        if remaining <= self.policy.window_for(credential.lifetime()) {
            Classification::ExpiringSoon { within: remaining }
        } else {
            Classification::Valid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 22, 12, 0, 0).unwrap()
    }

    fn hour_credential() -> Credential {
        Credential::issued("a", Some("r".to_string()), t0(), Duration::seconds(3600))
    }

    #[test]
    fn test_window_uses_larger_of_ratio_and_floor() {
        let policy = RefreshPolicy::default();
        // 10% of 1h = 6m, beats the 5m floor
        assert_eq!(policy.window_for(Duration::hours(1)), Duration::minutes(6));
        // 10% of 15m = 90s, floor wins
        assert_eq!(policy.window_for(Duration::minutes(15)), Duration::minutes(5));
    }

    #[test]
    fn test_fixed_window() {
        let policy = RefreshPolicy::fixed_window(Duration::seconds(30));
        assert_eq!(policy.window_for(Duration::hours(10)), Duration::seconds(30));
    }

    #[test]
    fn test_oversized_floor_saturates_instead_of_panicking() {
        let policy = RefreshPolicy {
            lookahead_ratio: 0.0,
            lookahead_floor_secs: i64::MAX,
        };
        assert_eq!(policy.window_for(Duration::hours(1)), Duration::MAX);

        let validator = TokenValidator::new(policy);
        assert!(matches!(
            validator.classify(&hour_credential(), t0()),
            Classification::ExpiringSoon { .. }
        ));
    }

    #[test]
    fn test_saturating_seconds() {
        assert_eq!(saturating_seconds(90), Duration::seconds(90));
        assert_eq!(saturating_seconds(i64::MAX), Duration::MAX);
        assert_eq!(saturating_seconds(i64::MIN), Duration::MIN);
    }

    #[test]
    fn test_classify_fresh_credential_is_valid() {
        let validator = TokenValidator::default();
        assert_eq!(validator.classify(&hour_credential(), t0()), Classification::Valid);
    }

    #[test]
    fn test_classify_inside_window_is_expiring_soon() {
        let validator = TokenValidator::default();
        let now = t0() + Duration::seconds(3600 - 120);
        assert_eq!(
            validator.classify(&hour_credential(), now),
            Classification::ExpiringSoon {
                within: Duration::seconds(120)
            }
        );
    }

    #[test]
    fn test_classify_at_expiry_is_expired() {
        let validator = TokenValidator::default();
        let cred = hour_credential();
        assert_eq!(validator.classify(&cred, cred.expires_at()), Classification::Expired);
        assert_eq!(
            validator.classify(&cred, cred.expires_at() + Duration::days(3)),
            Classification::Expired
        );
    }

    #[test]
    fn test_five_seconds_left_with_thirty_second_window() {
        let validator = TokenValidator::new(RefreshPolicy::fixed_window(Duration::seconds(30)));
        let cred = Credential::issued("a", None, t0(), Duration::seconds(5));
        assert!(matches!(
            validator.classify(&cred, t0()),
            Classification::ExpiringSoon { .. }
        ));
    }

    #[test]
    fn test_classification_is_monotonic_over_time() {
        let policies = [
            RefreshPolicy::default(),
            RefreshPolicy::fixed_window(Duration::seconds(30)),
            RefreshPolicy {
                lookahead_ratio: 0.5,
                lookahead_floor_secs: 0,
            },
        ];
        let lifetimes = [1, 5, 59, 900, 3600, 86_400];

        for policy in policies {
            let validator = TokenValidator::new(policy);
            for lifetime in lifetimes {
                let cred = Credential::issued("a", None, t0(), Duration::seconds(lifetime));
                let mut previous = 0u8;
                let mut offset = -60;
                while offset <= lifetime + 60 {
                    let severity = validator
                        .classify(&cred, t0() + Duration::seconds(offset))
                        .severity();
                    assert!(
                        severity >= previous,
                        "classification improved at offset {} for lifetime {}",
                        offset,
                        lifetime
                    );
                    previous = severity;
                    offset += 1;
                }
                assert_eq!(previous, 2);
            }
        }
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RefreshPolicy = serde_json::from_str(r#"{"lookahead_floor_secs": 30}"#).unwrap();
        assert_eq!(policy.lookahead_floor_secs, 30);
        assert_eq!(policy.lookahead_ratio, DEFAULT_LOOKAHEAD_RATIO);
    }
}
