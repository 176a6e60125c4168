//! Test-pattern frame source for running without sensor hardware

use super::frame::FrameBuffer;
use super::package::Tier;
use super::source::{FrameSource, Grab};

/// Emits a moving luma ramp with neutral chroma.
///
/// The small tier becomes ready every `small_every` polls; once it has been
/// taken, the large tier needs `large_lag` further polls, mimicking two taps
/// of the same scaler pipeline that drain at slightly different times.
pub struct SyntheticSource {
    small_every: u32,
    large_lag: u32,
    polls: u32,
    large_pending: Option<u32>,
    sequence: u64,
}

impl SyntheticSource {
    pub fn new(small_every: u32, large_lag: u32) -> Self {
        Self {
            small_every: small_every.max(1),
            large_lag,
            polls: 0,
            large_pending: None,
            sequence: 0,
        }
    }

    fn paint(buf: &mut FrameBuffer, sequence: u64) {
        let width = buf.size().width.max(1) as usize;
        let luma_len = buf.size().area();
        let data = buf.data_mut();
        let shift = sequence as usize;
        let (luma, chroma) = data.split_at_mut(luma_len.min(data.len()));
        for (i, px) in luma.iter_mut().enumerate() {
            *px = ((i % width + shift) & 0xff) as u8;
        }
        chroma.fill(0x80);
        let len = data.len();
        buf.stamp(sequence, len);
    }
}

impl FrameSource for SyntheticSource {
    fn try_get_frame(&mut self, tier: Tier, buf: &mut FrameBuffer) -> Grab {
        match tier {
            Tier::Small => {
                self.polls += 1;
                if self.polls < self.small_every {
                    return Grab::NotReady;
                }
                self.polls = 0;
                self.sequence += 1;
                self.large_pending = Some(self.large_lag);
                Self::paint(buf, self.sequence);
                Grab::Ready
            }
            Tier::Large => match self.large_pending {
                Some(0) => {
                    self.large_pending = None;
                    Self::paint(buf, self.sequence);
                    Grab::Ready
                }
                Some(n) => {
                    self.large_pending = Some(n - 1);
                    Grab::NotReady
                }
                None => Grab::NotReady,
            },
        }
    }
}
