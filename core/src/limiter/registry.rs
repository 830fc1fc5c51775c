use std::collections::BTreeMap;

use crate::config::ChannelConfig;
use crate::error::GovernorError;

use super::limiter::{ChannelLimiter, LimiterStats};

/// Channel name -> limiter, fixed once built.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, ChannelLimiter>,
}

impl ChannelRegistry {
    pub fn from_config(channels: &BTreeMap<String, ChannelConfig>) -> Self {
        let channels = channels
            .iter()
            .map(|(name, cfg)| (name.clone(), ChannelLimiter::new(name.clone(), *cfg)))
            .collect();
        Self { channels }
    }

    pub fn with_channel(mut self, name: impl Into<String>, cfg: ChannelConfig) -> Self {
        let name = name.into();
        self.channels
            .insert(name.clone(), ChannelLimiter::new(name, cfg));
        self
    }

    pub fn get(&self, name: &str) -> Result<&ChannelLimiter, GovernorError> {
        self.channels
            .get(name)
            .ok_or_else(|| GovernorError::UnknownChannel(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Sorted by channel name.
    pub fn stats(&self) -> Vec<LimiterStats> {
        self.channels.values().map(ChannelLimiter::stats).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_channels;

    #[test]
    fn builds_one_limiter_per_configured_channel() {
        let registry = ChannelRegistry::from_config(&default_channels());
        assert_eq!(registry.len(), 5);
        let video = registry.get("videoGeneration").unwrap();
        assert_eq!(video.max_concurrent(), 1);
        assert_eq!(video.min_delay().as_millis(), 5000);

        let names: Vec<_> = registry.stats().into_iter().map(|s| s.channel).collect();
        assert_eq!(
            names,
            vec!["copilot", "pexels", "unsplash", "videoGeneration", "youtube"]
        );
    }

    #[test]
    fn unknown_channel_is_a_configuration_error() {
        let registry = ChannelRegistry::default().with_channel("search", ChannelConfig::new(1, 0));
        let err = registry.get("imageSearch").err().unwrap();
        assert!(matches!(err, GovernorError::UnknownChannel(ref n) if n == "imageSearch"));
    }
}
