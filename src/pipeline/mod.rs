pub mod capture_loop;
pub mod pingpang;
pub mod stats;

pub use capture_loop::{CaptureHandle, CaptureLoop, CycleOutcome, LoopState};
pub use pingpang::{Delivery, PingPangBuffer, Producer};
pub use stats::{CaptureStats, StatsSnapshot};

use crate::capture::ImagePackage;

/// What the consumer receives for each published frame set
pub type PackageDelivery = Delivery<ImagePackage>;
