use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest edge of an upscaled tile canvas (`tile_size * upscale`).
pub const MAX_CANVAS_SIZE: u32 = 16_384;

/// Canvas geometry and matching parameters shared by tiling and rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OverlayParams {
    /// Pixels per tile edge on the remote canvas.
    pub tile_size: u32,
    /// Render scale for templates and tiles. Must be odd so every upscaled
    /// cell has a center pixel.
    pub upscale: u32,
    /// Per-channel color tolerance, also the alpha threshold for scoring.
    pub tolerance: u8,
}

impl Default for OverlayParams {
    fn default() -> Self {
        Self::wplace()
    }
}

impl OverlayParams {
    /// 1000px tiles, 3x shredding, tolerance 3.
    pub fn wplace() -> Self {
        Self {
            tile_size: 1000,
            upscale: 3,
            tolerance: 3,
        }
    }

    /// Exact color matching only.
    pub fn strict() -> Self {
        Self {
            tolerance: 0,
            ..Self::wplace()
        }
    }

    /// Forgiving matching for lossy tile sources.
    pub fn loose() -> Self {
        Self {
            tolerance: 8,
            ..Self::wplace()
        }
    }

    pub fn from_preset(name: &str) -> Option<Self> {
        match name {
            "wplace" => Some(Self::wplace()),
            "strict" => Some(Self::strict()),
            "loose" => Some(Self::loose()),
            _ => None,
        }
    }

    pub fn all_presets() -> Vec<(&'static str, Self)> {
        vec![
            ("wplace", Self::wplace()),
            ("strict", Self::strict()),
            ("loose", Self::loose()),
        ]
    }

    pub fn with_tolerance(mut self, tolerance: u8) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(Error::InvalidInput("Tile size must be positive".into()));
        }
        if self.upscale == 0 || self.upscale % 2 == 0 {
            return Err(Error::InvalidInput(format!(
                "Upscale factor must be odd, got {}",
                self.upscale
            )));
        }
        match self.tile_size.checked_mul(self.upscale) {
            Some(size) if size <= MAX_CANVAS_SIZE => Ok(()),
            _ => Err(Error::InvalidInput(format!(
                "Tile size {} at upscale {} exceeds the {}px canvas limit",
                self.tile_size, self.upscale, MAX_CANVAS_SIZE
            ))),
        }
    }

    /// Offset of the surviving pixel inside an upscaled cell.
    pub fn mask_center(&self) -> u32 {
        self.upscale / 2
    }

    /// Edge length of an upscaled tile canvas.
    pub fn canvas_size(&self) -> u32 {
        self.tile_size * self.upscale
    }
}
