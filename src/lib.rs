pub mod capture;
pub mod error;
pub mod pipeline;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{ImagePackage, Rotation, Size, StreamId, Tier};
pub use error::{Error, Result};
pub use pipeline::{CaptureHandle, CaptureLoop, CycleOutcome, Delivery, PingPangBuffer};

/// Environment variables with this prefix override file settings,
/// e.g. `CAMREADER__CAPTURE__SECONDARY_ENABLED=true`.
pub const ENV_PREFIX: &str = "CAMREADER";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Liveness mode: allocate and acquire the secondary (NIR) stream too.
    pub secondary_enabled: bool,
    pub primary: StreamConfig,
    pub secondary: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub name: String,
    pub source: SourceConfig,
    /// Sensor output size feeding the scaler channels.
    pub input: Size,
    pub large: ChannelConfig,
    pub small: ChannelConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Scaler channel index on the sensor pipeline.
    pub index: u32,
    pub size: Size,
    pub rotation: Rotation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Test-pattern generator, no hardware required.
    Synthetic { small_every: u32, large_lag: u32 },
    /// One V4L2 capture node per tier.
    V4l2 {
        large_device: String,
        small_device: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Backoff between polls, both for missed cycles and large-tier retries.
    pub poll_interval_us: u64,
    /// `None` retries the large tier until it succeeds.
    pub large_tier_retry_limit: Option<u32>,
    /// Pin the capture thread to this CPU core.
    pub capture_core: Option<usize>,
}

impl Config {
    /// Load `path` (TOML) and layer `CAMREADER__*` environment overrides on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.capture.validate()?;
        self.pipeline.validate()
    }
}

impl CaptureConfig {
    /// Streams that take part in acquisition, primary first.
    pub fn enabled_streams(&self) -> impl Iterator<Item = (StreamId, &StreamConfig)> {
        let secondary = self
            .secondary_enabled
            .then_some((StreamId::Secondary, &self.secondary));
        std::iter::once((StreamId::Primary, &self.primary)).chain(secondary)
    }

    pub fn validate(&self) -> Result<()> {
        for (stream, cfg) in self.enabled_streams() {
            for tier in Tier::ALL {
                let size = cfg.channel(tier).size;
                if size.width == 0 || size.height == 0 {
                    return Err(Error::InvalidGeometry {
                        stream,
                        tier,
                        width: size.width,
                        height: size.height,
                    });
                }
                // Scaler channels only downscale; rotation happens after scaling.
                if size.width > cfg.input.width || size.height > cfg.input.height {
                    return Err(Error::ChannelExceedsInput {
                        stream,
                        tier,
                        channel: size,
                        input: cfg.input,
                    });
                }
            }
            if cfg.large.index == cfg.small.index {
                return Err(Error::DuplicateChannel {
                    stream,
                    index: cfg.large.index,
                });
            }
        }
        Ok(())
    }
}

impl StreamConfig {
    fn named(name: &str) -> Self {
        Self {
            name: name.into(),
            source: SourceConfig::default(),
            input: Size::new(1920, 1080),
            large: ChannelConfig {
                index: 1,
                size: Size::new(1080, 704),
                rotation: Rotation::Deg90,
            },
            small: ChannelConfig {
                index: 2,
                size: Size::new(320, 224),
                rotation: Rotation::Deg90,
            },
        }
    }

    pub fn channel(&self, tier: Tier) -> &ChannelConfig {
        match tier {
            Tier::Large => &self.large,
            Tier::Small => &self.small,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn validate(&self) -> Result<()> {
        if self.large_tier_retry_limit == Some(0) {
            return Err(Error::ZeroRetryLimit);
        }
        Ok(())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            secondary_enabled: false,
            primary: StreamConfig::named("bgr"),
            secondary: StreamConfig::named("nir"),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::named("bgr")
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Synthetic {
            small_every: 3,
            large_lag: 1,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: 10,
            large_tier_retry_limit: None,
            capture_core: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_sensor_layout() {
        let config = Config::default();
        assert!(!config.capture.secondary_enabled);
        assert_eq!(config.capture.primary.name, "bgr");
        assert_eq!(config.capture.secondary.name, "nir");
        assert_eq!(config.capture.primary.large.size, Size::new(1080, 704));
        assert_eq!(config.capture.primary.small.rotation, Rotation::Deg90);
        assert_eq!(config.pipeline.poll_interval(), Duration::from_micros(10));
        assert_eq!(config.capture.enabled_streams().count(), 1);
    }

    #[test]
    fn load_merges_partial_file_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[capture]
secondary_enabled = true

[capture.secondary]
name = "ir"

[capture.secondary.source]
kind = "synthetic"
small_every = 1
large_lag = 0

[pipeline]
poll_interval_us = 250
large_tier_retry_limit = 8
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(config.capture.secondary_enabled);
        assert_eq!(config.capture.secondary.name, "ir");
        assert_eq!(
            config.capture.secondary.source,
            SourceConfig::Synthetic {
                small_every: 1,
                large_lag: 0
            }
        );
        assert_eq!(config.capture.primary.name, "bgr");
        assert_eq!(config.pipeline.poll_interval_us, 250);
        assert_eq!(config.pipeline.large_tier_retry_limit, Some(8));
        assert_eq!(config.capture.enabled_streams().count(), 2);
    }

    #[test]
    fn zero_sized_channel_is_rejected() {
        let mut capture = CaptureConfig::default();
        capture.primary.small.size = Size::new(0, 224);
        let err = capture.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidGeometry {
                stream: StreamId::Primary,
                tier: Tier::Small,
                ..
            }
        ));
    }

    #[test]
    fn channel_larger_than_input_is_rejected() {
        let mut capture = CaptureConfig::default();
        capture.primary.input = Size::new(1000, 720);
        let err = capture.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::ChannelExceedsInput {
                stream: StreamId::Primary,
                tier: Tier::Large,
                channel: Size { width: 1080, height: 704 },
                input: Size { width: 1000, height: 720 },
            }
        ));
    }

    #[test]
    fn tiers_need_distinct_channels() {
        let mut capture = CaptureConfig::default();
        capture.primary.small.index = capture.primary.large.index;
        assert!(matches!(
            capture.validate().unwrap_err(),
            Error::DuplicateChannel {
                stream: StreamId::Primary,
                index: 1
            }
        ));
    }

    #[test]
    fn zero_retry_limit_is_rejected() {
        let mut config = Config::default();
        config.pipeline.large_tier_retry_limit = Some(0);
        assert!(matches!(config.validate(), Err(Error::ZeroRetryLimit)));
        config.pipeline.large_tier_retry_limit = Some(1);
        assert!(config.validate().is_ok());
        config.pipeline.large_tier_retry_limit = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn disabled_secondary_is_not_validated() {
        let mut capture = CaptureConfig::default();
        capture.secondary.large.size = Size::new(0, 0);
        assert!(capture.validate().is_ok());
        capture.secondary_enabled = true;
        assert!(capture.validate().is_err());
    }
}
