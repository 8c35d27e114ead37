//! Tile/pixel addressing on the remote canvas.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Address of one template segment: the tile it lives on and its offset
/// inside that tile.
///
/// String form is `"tttt,tttt,ppp,ppp"` (tile coordinates padded to four
/// digits, pixel offsets to three).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey {
    pub tile_x: u32,
    pub tile_y: u32,
    pub pixel_x: u32,
    pub pixel_y: u32,
}

impl TileKey {
    pub fn new(tile_x: u32, tile_y: u32, pixel_x: u32, pixel_y: u32) -> Self {
        Self {
            tile_x,
            tile_y,
            pixel_x,
            pixel_y,
        }
    }

    pub fn tile(&self) -> (u32, u32) {
        (self.tile_x, self.tile_y)
    }

    pub fn is_on_tile(&self, tile_x: u32, tile_y: u32) -> bool {
        self.tile_x == tile_x && self.tile_y == tile_y
    }
}

/// The `"tttt,tttt"` prefix shared by every key on a tile.
pub fn tile_prefix(tile_x: u32, tile_y: u32) -> String {
    format!("{:04},{:04}", tile_x, tile_y)
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{:03},{:03}",
            tile_prefix(self.tile_x, self.tile_y),
            self.pixel_x,
            self.pixel_y
        )
    }
}

impl FromStr for TileKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [tile_x, tile_y, pixel_x, pixel_y] = parse_four(s)
            .ok_or_else(|| Error::InvalidInput(format!("Malformed tile key '{}'", s)))?;
        Ok(Self::new(tile_x, tile_y, pixel_x, pixel_y))
    }
}

/// Largest tile index accepted for a template anchor.
pub const MAX_TILE_INDEX: u32 = 1 << 20;

/// Top-left anchor of a template on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateCoords {
    pub tile_x: u32,
    pub tile_y: u32,
    pub pixel_x: u32,
    pub pixel_y: u32,
}

impl TemplateCoords {
    pub fn new(tile_x: u32, tile_y: u32, pixel_x: u32, pixel_y: u32) -> Self {
        Self {
            tile_x,
            tile_y,
            pixel_x,
            pixel_y,
        }
    }

    /// Reject pixel offsets that fall outside the anchor tile and tile
    /// indices past [`MAX_TILE_INDEX`].
    pub fn validate(&self, tile_size: u32) -> Result<(), Error> {
        if self.tile_x > MAX_TILE_INDEX || self.tile_y > MAX_TILE_INDEX {
            return Err(Error::InvalidInput(format!(
                "Tile ({}, {}) is outside the canvas (max {})",
                self.tile_x, self.tile_y, MAX_TILE_INDEX
            )));
        }
        if self.pixel_x >= tile_size || self.pixel_y >= tile_size {
            return Err(Error::InvalidInput(format!(
                "Pixel offset ({}, {}) must be below the tile size {}",
                self.pixel_x, self.pixel_y, tile_size
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TemplateCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}",
            self.tile_x, self.tile_y, self.pixel_x, self.pixel_y
        )
    }
}

impl FromStr for TemplateCoords {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [tile_x, tile_y, pixel_x, pixel_y] = parse_four(s).ok_or_else(|| {
            Error::InvalidInput(format!(
                "Coordinates '{}' must be four integers: tile x, tile y, pixel x, pixel y",
                s
            ))
        })?;
        Ok(Self::new(tile_x, tile_y, pixel_x, pixel_y))
    }
}

fn parse_four(s: &str) -> Option<[u32; 4]> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .ok()?;
    parts.try_into().ok()
}

/// Map a server tile/pixel pair to the number the canvas shows on screen.
/// Tile coordinates wrap every four tiles.
pub fn server_tile_to_display_tile(tile: (u32, u32), pixel: (u32, u32), tile_size: u32) -> (u32, u32) {
    (
        (tile.0 % 4).saturating_mul(tile_size).saturating_add(pixel.0),
        (tile.1 % 4).saturating_mul(tile_size).saturating_add(pixel.1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_key_format() {
        let key = TileKey::new(12, 3, 5, 999);
        assert_eq!(key.to_string(), "0012,0003,005,999");
        assert!(key.to_string().starts_with(&tile_prefix(12, 3)));
    }

    #[test]
    fn test_tile_key_parse() {
        let key: TileKey = "0012,0003,005,999".parse().unwrap();
        assert_eq!(key, TileKey::new(12, 3, 5, 999));
        assert!("0012,0003,005".parse::<TileKey>().is_err());
        assert!("a,b,c,d".parse::<TileKey>().is_err());
    }

    #[test]
    fn test_key_order_matches_string_order() {
        let mut keys = vec![
            TileKey::new(2, 0, 0, 0),
            TileKey::new(1, 5, 10, 0),
            TileKey::new(1, 5, 9, 400),
            TileKey::new(1, 4, 999, 999),
        ];
        let mut strings: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        keys.sort();
        strings.sort();
        let sorted: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(sorted, strings);
    }

    #[test]
    fn test_coords_round_trip() {
        let coords = TemplateCoords::new(1023, 677, 10, 900);
        assert_eq!(coords.to_string(), "1023, 677, 10, 900");
        assert_eq!(coords.to_string().parse::<TemplateCoords>().unwrap(), coords);
        assert_eq!("1,2,3,4".parse::<TemplateCoords>().unwrap(), TemplateCoords::new(1, 2, 3, 4));
        assert!("1, 2, 3".parse::<TemplateCoords>().is_err());
        assert!("1, 2, 3, -4".parse::<TemplateCoords>().is_err());
    }

    #[test]
    fn test_coords_validate() {
        assert!(TemplateCoords::new(0, 0, 999, 0).validate(1000).is_ok());
        assert!(TemplateCoords::new(0, 0, 1000, 0).validate(1000).is_err());
        assert!(TemplateCoords::new(MAX_TILE_INDEX, 0, 0, 0).validate(1000).is_ok());
        assert!(TemplateCoords::new(0, MAX_TILE_INDEX + 1, 0, 0).validate(1000).is_err());
        assert!(TemplateCoords::new(u32::MAX, 0, 0, 0).validate(1000).is_err());
    }

    #[test]
    fn test_display_tile_wraps() {
        for t in 0..4 {
            assert_eq!(server_tile_to_display_tile((t, t), (7, 8), 1000), (t * 1000 + 7, t * 1000 + 8));
        }
        assert_eq!(server_tile_to_display_tile((5, 1030), (1, 2), 1000), (1001, 2002));
        assert_eq!(server_tile_to_display_tile((3, 0), (u32::MAX, 0), 1000), (u32::MAX, 0));
        assert_eq!(
            server_tile_to_display_tile((5, 1030), (1, 2), 1000),
            server_tile_to_display_tile((5, 1030), (1, 2), 1000)
        );
    }
}
