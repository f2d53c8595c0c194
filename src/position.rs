//! Cell positions as stored in the tracking table, and their mapping to image pixels.

use crate::error::{LineageError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const DEFAULT_UM_PER_PIXEL: f64 = 0.144;

/// Position in micrometers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x_um: f64,
    pub y_um: f64,
}

fn pos_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\[\s*([^,\[\]\s]+)\s*,\s*([^,\[\]\s]+)\s*\]\s*$")
            .expect("position pattern is valid")
    })
}

impl Position {
    pub fn new(x_um: f64, y_um: f64) -> Self {
        Self { x_um, y_um }
    }

    /// Parses the bracketed `"[x, y]"` form used by the `pos` column.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = pos_regex().captures(text)?;
        let x_um: f64 = caps[1].parse().ok()?;
        let y_um: f64 = caps[2].parse().ok()?;
        if !x_um.is_finite() || !y_um.is_finite() {
            return None;
        }
        Some(Self { x_um, y_um })
    }

    /// Nearest pixel, halves going to the even neighbor.
    pub fn to_pixel(&self, scale: PixelScale) -> (i64, i64) {
        (
            (self.x_um / scale.um_per_pixel()).round_ties_even() as i64,
            (self.y_um / scale.um_per_pixel()).round_ties_even() as i64,
        )
    }

    pub fn from_pixel(x_px: f64, y_px: f64, scale: PixelScale) -> Self {
        Self {
            x_um: x_px * scale.um_per_pixel(),
            y_um: y_px * scale.um_per_pixel(),
        }
    }
}

/// Micrometers-per-pixel conversion factor. Always finite and positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelScale(f64);

impl PixelScale {
    pub fn new(um_per_pixel: f64) -> Result<Self> {
        if !um_per_pixel.is_finite() || um_per_pixel <= 0.0 {
            return Err(LineageError::InvalidInput(format!(
                "um_per_pixel must be a positive number, got {um_per_pixel}"
            )));
        }
        Ok(Self(um_per_pixel))
    }

    pub fn um_per_pixel(&self) -> f64 {
        self.0
    }
}

impl Default for PixelScale {
    fn default() -> Self {
        Self(DEFAULT_UM_PER_PIXEL)
    }
}
