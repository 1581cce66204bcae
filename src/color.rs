//! Indicator colors
//!
//! Colors travel as `"<R>,<G>,<B>"` text, both in the settings file and as
//! the BLE payload. The serial firmware only understands single-letter codes,
//! so a color is reduced to the nearest entry of a small palette there.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An 8-bit-per-channel color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const RED: Rgb = Rgb::new(255, 0, 0);
    pub const GREEN: Rgb = Rgb::new(0, 255, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Single-byte command understood by the serial firmware
    pub fn serial_code(&self) -> u8 {
        let mut best = PALETTE[0];
        let mut best_distance = u32::MAX;

        for entry in PALETTE {
            let distance = self.distance_sq(&entry.1);
            if distance < best_distance {
                best = entry;
                best_distance = distance;
            }
        }

        best.0
    }

    fn distance_sq(&self, other: &Rgb) -> u32 {
        let dr = self.r.abs_diff(other.r) as u32;
        let dg = self.g.abs_diff(other.g) as u32;
        let db = self.b.abs_diff(other.b) as u32;
        dr * dr + dg * dg + db * db
    }
}

/// Serial codes in tie-break order
const PALETTE: [(u8, Rgb); 8] = [
    (b'R', Rgb::new(255, 0, 0)),
    (b'G', Rgb::new(0, 255, 0)),
    (b'B', Rgb::new(0, 0, 255)),
    (b'Y', Rgb::new(255, 255, 0)),
    (b'C', Rgb::new(0, 255, 255)),
    (b'M', Rgb::new(255, 0, 255)),
    (b'W', Rgb::new(255, 255, 255)),
    (b'O', Rgb::new(0, 0, 0)),
];

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.r, self.g, self.b)
    }
}

/// Errors from parsing `"<R>,<G>,<B>"` text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseColorError {
    #[error("expected three comma-separated channels, got {0}")]
    ChannelCount(usize),

    #[error("invalid channel value {0:?}: expected 0-255")]
    Channel(String),
}

impl FromStr for Rgb {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(ParseColorError::ChannelCount(parts.len()));
        }

        let channel = |part: &str| {
            part.parse::<u8>()
                .map_err(|_| ParseColorError::Channel(part.to_string()))
        };

        Ok(Rgb::new(channel(parts[0])?, channel(parts[1])?, channel(parts[2])?))
    }
}

impl TryFrom<String> for Rgb {
    type Error = ParseColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(color: Rgb) -> Self {
        color.to_string()
    }
}

/// Which configured color a change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSlot {
    /// Shown while the microphone is in use
    Active,
    /// Shown while the microphone is idle
    Idle,
}
