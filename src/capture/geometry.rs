//! Channel geometry: declared size plus rotation gives the buffer size.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    pub const fn area(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Scaler output rotation, fixed per channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    #[serde(rename = "none", alias = "0")]
    None,
    #[serde(rename = "90")]
    Deg90,
    #[serde(rename = "180")]
    Deg180,
    #[serde(rename = "270")]
    Deg270,
}

impl Rotation {
    /// 90 and 270 degree rotations swap the frame axes.
    pub const fn is_orthogonal(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    pub const fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// Size of the frames a channel actually delivers.
///
/// Every buffer allocation for a channel goes through here, so allocation-time
/// and acquisition-time geometry cannot drift apart.
pub const fn effective_size(declared: Size, rotation: Rotation) -> Size {
    if rotation.is_orthogonal() {
        declared.transposed()
    } else {
        declared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_turns_swap_axes() {
        let declared = Size::new(1080, 704);
        assert_eq!(effective_size(declared, Rotation::Deg90), Size::new(704, 1080));
        assert_eq!(effective_size(declared, Rotation::Deg270), Size::new(704, 1080));
    }

    #[test]
    fn unrotated_and_half_turn_keep_axes() {
        let declared = Size::new(1080, 704);
        assert_eq!(effective_size(declared, Rotation::None), declared);
        assert_eq!(effective_size(declared, Rotation::Deg180), declared);
    }

    #[test]
    fn rotation_parses_from_degrees() {
        #[derive(Deserialize)]
        struct Wrapper {
            rotation: Rotation,
        }
        let parsed: Wrapper = config::Config::builder()
            .add_source(config::File::from_str(
                r#"rotation = "270""#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(parsed.rotation, Rotation::Deg270);
        assert_eq!(parsed.rotation.degrees(), 270);
    }
}
