use std::time::Duration;

use crate::{
    error::{LimiterError, LimiterResult},
    ratelimit::Category,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaProfile {
    limit: u32,
    window: Duration,
    block_duration: Duration,
}

impl QuotaProfile {
    pub fn new(limit: u32, window: Duration, block_duration: Duration) -> LimiterResult<Self> {
        if limit == 0 {
            return Err(LimiterError::Config("quota limit must be > 0".to_string()));
        }
        if window.is_zero() || block_duration.is_zero() {
            return Err(LimiterError::Config(
                "quota window and block duration must be > 0".to_string(),
            ));
        }
        Ok(Self {
            limit,
            window,
            block_duration,
        })
    }

    const fn fixed(limit: u32, window_secs: u64, block_secs: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(window_secs),
            block_duration: Duration::from_secs(block_secs),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }
}

const HOUR: u64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRegistry {
    profiles: [QuotaProfile; 3],
}

impl Default for QuotaRegistry {
    fn default() -> Self {
        Self {
            profiles: [
                QuotaProfile::fixed(20, 60, 60),
                QuotaProfile::fixed(5, HOUR, HOUR),
                QuotaProfile::fixed(3, HOUR, HOUR),
            ],
        }
    }
}

impl QuotaRegistry {
    /// Default table with `RATE_LIMIT_QUOTA_<CATEGORY>=<limit>/<window_secs>[/<block_secs>]` overrides.
    pub fn from_lookup<F>(lookup: F) -> LimiterResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut registry = Self::default();
        for category in Category::ALL {
            let key = format!(
                "RATE_LIMIT_QUOTA_{}",
                category.as_str().to_ascii_uppercase()
            );
            if let Some(raw) = lookup(&key).filter(|v| !v.trim().is_empty()) {
                let profile = parse_profile(&raw)
                    .map_err(|e| LimiterError::Config(format!("{key}: {e}")))?;
                registry = registry.with_profile(category, profile);
            }
        }
        Ok(registry)
    }

    pub fn with_profile(mut self, category: Category, profile: QuotaProfile) -> Self {
        self.profiles[category.index()] = profile;
        self
    }

    pub fn profile_for(&self, category: Category) -> QuotaProfile {
        self.profiles[category.index()]
    }
}

fn parse_profile(raw: &str) -> Result<QuotaProfile, String> {
    let parts = raw
        .split('/')
        .map(|p| p.trim().parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid quota `{raw}`: {e}"))?;

    let (limit, window, block) = match parts.as_slice() {
        [limit, window] => (*limit, *window, *window),
        [limit, window, block] => (*limit, *window, *block),
        _ => return Err(format!("expected <limit>/<window_secs>[/<block_secs>], got `{raw}`")),
    };
    let limit = u32::try_from(limit).map_err(|_| format!("quota limit too large: {limit}"))?;

    QuotaProfile::new(limit, Duration::from_secs(window), Duration::from_secs(block))
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_table_is_positive_for_every_category() {
        let registry = QuotaRegistry::default();
        for category in Category::ALL {
            let profile = registry.profile_for(category);
            assert!(profile.limit() > 0);
            assert!(!profile.window().is_zero());
            assert!(!profile.block_duration().is_zero());
        }

        let contact = registry.profile_for(Category::Contact);
        assert_eq!(contact.limit(), 3);
        assert_eq!(contact.window(), Duration::from_secs(3600));

        let core = registry.profile_for(Category::Core);
        assert_eq!(core.limit(), 20);
        assert_eq!(core.window(), Duration::from_secs(60));
    }

    #[test]
    fn applies_overrides_from_lookup() {
        let env = HashMap::from([
            ("RATE_LIMIT_QUOTA_GUESTBOOK", "10/600"),
            ("RATE_LIMIT_QUOTA_CORE", "100/60/300"),
        ]);
        let registry =
            QuotaRegistry::from_lookup(|key| env.get(key).map(ToString::to_string)).unwrap();

        let guestbook = registry.profile_for(Category::Guestbook);
        assert_eq!(guestbook.limit(), 10);
        assert_eq!(guestbook.block_duration(), Duration::from_secs(600));

        let core = registry.profile_for(Category::Core);
        assert_eq!(core.block_duration(), Duration::from_secs(300));
        assert_eq!(
            registry.profile_for(Category::Contact),
            QuotaRegistry::default().profile_for(Category::Contact)
        );
    }

    #[test]
    fn rejects_non_positive_or_malformed_overrides() {
        for raw in ["0/60", "5/0", "5/60/0", "five/60", "5", "1/2/3/4"] {
            let result = QuotaRegistry::from_lookup(|key| {
                (key == "RATE_LIMIT_QUOTA_CONTACT").then(|| raw.to_string())
            });
            assert!(
                matches!(result, Err(LimiterError::Config(_))),
                "{raw} should be rejected"
            );
        }
    }
}
