//! Canvas palette and tolerance-expanded color matching.
//!
//! Matching is an exact hash lookup after expansion:
//!
//! - alpha == 0 -> Transparent
//! - rgb inside some color's tolerance cube -> that color (first registered wins)
//! - anything else -> Other

use std::collections::HashMap;

/// Palette color identifier. Negative ids are sentinels.
pub type ColorId = i16;

pub const TRANSPARENT: ColorId = 0;
pub const ERASED: ColorId = -1;
pub const OTHER: ColorId = -2;

/// One entry of the canvas palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteColor {
    pub id: ColorId,
    pub premium: bool,
    pub name: &'static str,
    pub rgb: [u8; 3],
}

impl PaletteColor {
    pub const fn new(id: ColorId, premium: bool, name: &'static str, rgb: [u8; 3]) -> Self {
        Self {
            id,
            premium,
            name,
            rgb,
        }
    }
}

const fn free(id: ColorId, name: &'static str, rgb: [u8; 3]) -> PaletteColor {
    PaletteColor::new(id, false, name, rgb)
}

const fn premium(id: ColorId, name: &'static str, rgb: [u8; 3]) -> PaletteColor {
    PaletteColor::new(id, true, name, rgb)
}

/// The canvas palette, sentinels first. Iteration order is the registration
/// order used by [`ColorLookup::build`].
pub const PALETTE: &[PaletteColor] = &[
    free(ERASED, "Erased", [222, 250, 206]),
    free(OTHER, "Other", [43, 45, 48]),
    free(TRANSPARENT, "Transparent", [0, 0, 0]),
    free(1, "Black", [0, 0, 0]),
    free(2, "Dark Gray", [60, 60, 60]),
    free(3, "Gray", [120, 120, 120]),
    free(4, "Light Gray", [210, 210, 210]),
    free(5, "White", [255, 255, 255]),
    free(6, "Deep Red", [96, 0, 24]),
    free(7, "Red", [237, 28, 36]),
    free(8, "Orange", [255, 127, 39]),
    free(9, "Gold", [246, 170, 9]),
    free(10, "Yellow", [249, 221, 59]),
    free(11, "Light Yellow", [255, 250, 188]),
    free(12, "Dark Green", [14, 185, 104]),
    free(13, "Green", [19, 230, 123]),
    free(14, "Light Green", [135, 255, 94]),
    free(15, "Dark Teal", [12, 129, 110]),
    free(16, "Teal", [16, 174, 166]),
    free(17, "Light Teal", [19, 225, 190]),
    free(18, "Dark Blue", [40, 80, 158]),
    free(19, "Blue", [64, 147, 228]),
    free(20, "Cyan", [96, 247, 242]),
    free(21, "Indigo", [107, 80, 246]),
    free(22, "Light Indigo", [153, 177, 251]),
    free(23, "Dark Purple", [120, 12, 153]),
    free(24, "Purple", [170, 56, 185]),
    free(25, "Light Purple", [224, 159, 249]),
    free(26, "Dark Pink", [203, 0, 122]),
    free(27, "Pink", [236, 31, 128]),
    free(28, "Light Pink", [243, 141, 169]),
    free(29, "Dark Brown", [104, 70, 52]),
    free(30, "Brown", [149, 104, 42]),
    free(31, "Beige", [248, 178, 119]),
    premium(32, "Medium Gray", [170, 170, 170]),
    premium(33, "Dark Red", [165, 14, 30]),
    premium(34, "Light Red", [250, 128, 114]),
    premium(35, "Dark Orange", [228, 92, 26]),
    premium(36, "Light Tan", [214, 181, 148]),
    premium(37, "Dark Goldenrod", [156, 132, 49]),
    premium(38, "Goldenrod", [197, 173, 49]),
    premium(39, "Light Goldenrod", [232, 212, 95]),
    premium(40, "Dark Olive", [74, 107, 58]),
    premium(41, "Olive", [90, 148, 74]),
    premium(42, "Light Olive", [132, 197, 115]),
    premium(43, "Dark Cyan", [15, 121, 159]),
    premium(44, "Light Cyan", [187, 250, 242]),
    premium(45, "Light Blue", [125, 199, 255]),
    premium(46, "Dark Indigo", [77, 49, 184]),
    premium(47, "Dark Slate Blue", [74, 66, 132]),
    premium(48, "Slate Blue", [122, 113, 196]),
    premium(49, "Light Slate Blue", [181, 174, 241]),
    premium(50, "Light Brown", [219, 164, 99]),
    premium(51, "Dark Beige", [209, 128, 81]),
    premium(52, "Light Beige", [255, 197, 165]),
    premium(53, "Dark Peach", [155, 82, 73]),
    premium(54, "Peach", [209, 128, 120]),
    premium(55, "Light Peach", [250, 182, 164]),
    premium(56, "Dark Tan", [123, 99, 82]),
    premium(57, "Tan", [156, 132, 107]),
    premium(58, "Dark Slate", [51, 57, 65]),
    premium(59, "Slate", [109, 117, 141]),
    premium(60, "Light Slate", [179, 185, 209]),
    premium(61, "Dark Stone", [109, 100, 63]),
    premium(62, "Stone", [148, 140, 107]),
    premium(63, "Light Stone", [205, 197, 158]),
];

/// Look up a palette entry by id.
pub fn find_color(id: ColorId) -> Option<&'static PaletteColor> {
    PALETTE.iter().find(|c| c.id == id)
}

/// Display name for a color id, "Unknown" for ids outside the palette.
pub fn color_name(id: ColorId) -> &'static str {
    find_color(id).map(|c| c.name).unwrap_or("Unknown")
}

/// Pack RGBA bytes the way a little-endian read of an RGBA buffer does
/// (alpha ends up in the most significant byte).
#[inline]
pub fn pack_rgba(r: u8, g: u8, b: u8, a: u8) -> u32 {
    u32::from_le_bytes([r, g, b, a])
}

#[inline]
pub fn alpha_of(pixel: u32) -> u8 {
    ((pixel >> 24) & 0xFF) as u8
}

#[inline]
pub fn rgb_of(pixel: u32) -> [u8; 3] {
    let [r, g, b, _] = pixel.to_le_bytes();
    [r, g, b]
}

/// Exact-match lookup from packed opaque RGB to palette id.
#[derive(Debug, Clone)]
pub struct ColorLookup {
    table: HashMap<u32, ColorId>,
    tolerance: u8,
}

impl ColorLookup {
    /// Expand every palette color (except Transparent and Other) into its
    /// tolerance cube. A packed value keeps the id of the first color that
    /// claimed it.
    pub fn build(palette: &[PaletteColor], tolerance: u8) -> Self {
        let t = tolerance as i16;
        let side = (2 * t + 1) as usize;
        let mut table = HashMap::with_capacity(palette.len() * side * side * side);

        for color in palette {
            if color.id == TRANSPARENT || color.id == OTHER {
                continue;
            }
            let [r, g, b] = color.rgb.map(i16::from);

            for dr in -t..=t {
                let Some(rr) = channel(r + dr) else { continue };
                for dg in -t..=t {
                    let Some(gg) = channel(g + dg) else { continue };
                    for db in -t..=t {
                        let Some(bb) = channel(b + db) else { continue };
                        table.entry(pack_rgba(rr, gg, bb, 0xFF)).or_insert(color.id);
                    }
                }
            }
        }

        log::debug!(
            "Built color lookup: {} entries, tolerance {}",
            table.len(),
            tolerance
        );

        Self { table, tolerance }
    }

    pub fn tolerance(&self) -> u8 {
        self.tolerance
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Resolve a packed pixel to a palette id.
    pub fn match_color(&self, pixel: u32) -> ColorId {
        if alpha_of(pixel) == 0 {
            return TRANSPARENT;
        }
        let opaque = pixel | 0xFF00_0000;
        self.table.get(&opaque).copied().unwrap_or(OTHER)
    }

    pub fn match_rgba(&self, rgba: [u8; 4]) -> ColorId {
        self.match_color(u32::from_le_bytes(rgba))
    }
}

#[inline]
fn channel(value: i16) -> Option<u8> {
    u8::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_layout() {
        assert_eq!(pack_rgba(0x11, 0x22, 0x33, 0xFF), 0xFF33_2211);
        assert_eq!(alpha_of(pack_rgba(1, 2, 3, 200)), 200);
        assert_eq!(rgb_of(pack_rgba(1, 2, 3, 200)), [1, 2, 3]);
    }

    #[test]
    fn test_red_scenario() {
        let lookup = ColorLookup::build(PALETTE, 3);
        assert_eq!(lookup.match_rgba([237, 28, 36, 255]), 7);
        assert_eq!(lookup.match_rgba([240, 31, 39, 255]), 7);
        assert_eq!(lookup.match_rgba([245, 28, 36, 255]), OTHER);
    }

    #[test]
    fn test_zero_alpha_is_transparent() {
        let lookup = ColorLookup::build(PALETTE, 3);
        assert_eq!(lookup.match_rgba([237, 28, 36, 0]), TRANSPARENT);
        assert_eq!(lookup.match_color(0), TRANSPARENT);
    }

    #[test]
    fn test_partial_alpha_matches_by_rgb() {
        let lookup = ColorLookup::build(PALETTE, 0);
        assert_eq!(lookup.match_rgba([237, 28, 36, 1]), 7);
    }

    #[test]
    fn test_black_not_shadowed_by_transparent() {
        // Transparent shares Black's rgb but is never expanded.
        let lookup = ColorLookup::build(PALETTE, 2);
        assert_eq!(lookup.match_rgba([0, 0, 0, 255]), 1);
        assert_eq!(lookup.match_rgba([2, 1, 0, 255]), 1);
    }

    #[test]
    fn test_other_not_expanded() {
        let lookup = ColorLookup::build(PALETTE, 0);
        assert_eq!(lookup.match_rgba([43, 45, 48, 255]), OTHER);
        assert!(lookup.table.values().all(|&id| id != OTHER));
    }

    #[test]
    fn test_cube_coverage_with_clamping() {
        let tolerance = 4u8;
        let lookup = ColorLookup::build(PALETTE, tolerance);
        let t = tolerance as i16;

        for (idx, color) in PALETTE.iter().enumerate() {
            if color.id == TRANSPARENT || color.id == OTHER {
                continue;
            }
            let earlier = &PALETTE[..idx];
            for dr in -t..=t {
                for dg in -t..=t {
                    for db in -t..=t {
                        let rgb = [
                            color.rgb[0] as i16 + dr,
                            color.rgb[1] as i16 + dg,
                            color.rgb[2] as i16 + db,
                        ];
                        if rgb.iter().any(|&c| !(0..=255).contains(&c)) {
                            continue;
                        }
                        let claimed_earlier = earlier.iter().any(|e| {
                            e.id != TRANSPARENT
                                && e.id != OTHER
                                && (0..3).all(|i| (e.rgb[i] as i16 - rgb[i]).abs() <= t)
                        });
                        let id = lookup.match_rgba([rgb[0] as u8, rgb[1] as u8, rgb[2] as u8, 255]);
                        if claimed_earlier {
                            assert_ne!(id, OTHER);
                        } else {
                            assert_eq!(id, color.id, "rgb {:?}", rgb);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_first_registered_wins() {
        let palette = [
            free(10, "First", [100, 100, 100]),
            free(11, "Second", [104, 100, 100]),
        ];
        let lookup = ColorLookup::build(&palette, 3);
        // 102 and 103 are inside both cubes.
        assert_eq!(lookup.match_rgba([102, 100, 100, 255]), 10);
        assert_eq!(lookup.match_rgba([103, 100, 100, 255]), 10);
        assert_eq!(lookup.match_rgba([107, 100, 100, 255]), 11);
    }

    #[test]
    fn test_palette_ids_unique() {
        let mut ids: Vec<ColorId> = PALETTE.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), PALETTE.len());
        assert_eq!(color_name(7), "Red");
        assert_eq!(color_name(99), "Unknown");
    }
}
