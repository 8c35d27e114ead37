//! Template entity: one uploaded image anchored on the canvas, shredded into
//! tile-aligned segments.
//!
//! Pipeline for a new template:
//! decode -> palette census -> partition on tile boundaries -> per segment
//! (crop -> nearest upscale -> center-dot mask) -> keyed by tile.

use image::RgbaImage;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::codec::{decode_base64, decode_image, encode_base64, encode_png, pixels_to_u32};
use crate::coords::{TemplateCoords, TileKey};
use crate::error::{Error, Result};
use crate::palette::{find_color, ColorId, ColorLookup, TRANSPARENT};
use crate::params::OverlayParams;
use crate::raster::{apply_center_mask, upscale_nearest};

/// Pixel totals of a template, plus the per-tile correct counts from the
/// latest render of each tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixelCount {
    pub total: u64,
    pub colors: BTreeMap<ColorId, u64>,
    pub correct: BTreeMap<TileKey, BTreeMap<ColorId, u64>>,
}

impl PixelCount {
    /// Count every pixel of `img` by palette color.
    pub fn census(img: &RgbaImage, lookup: &ColorLookup) -> Self {
        let mut colors = BTreeMap::new();
        for pixel in img.pixels() {
            *colors.entry(lookup.match_rgba(pixel.0)).or_insert(0u64) += 1;
        }
        Self::from_colors(colors)
    }

    /// Build from a color histogram; the total excludes Transparent.
    pub fn from_colors(colors: BTreeMap<ColorId, u64>) -> Self {
        let total = colors
            .iter()
            .filter(|(&id, _)| id != TRANSPARENT)
            .map(|(_, &n)| n)
            .sum();
        Self {
            total,
            colors,
            correct: BTreeMap::new(),
        }
    }

    pub fn total_for(&self, id: ColorId) -> u64 {
        self.colors.get(&id).copied().unwrap_or(0)
    }

    /// Correct pixels of one color across all scored tiles.
    pub fn correct_for(&self, id: ColorId) -> u64 {
        self.correct
            .values()
            .filter_map(|per_color| per_color.get(&id))
            .sum()
    }

    /// Correct pixels across all tiles and colors, Transparent excluded.
    pub fn correct_total(&self) -> u64 {
        self.correct
            .values()
            .flat_map(|per_color| per_color.iter())
            .filter(|(&id, _)| id != TRANSPARENT)
            .map(|(_, &n)| n)
            .sum()
    }
}

/// Per-color progress line for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorStat {
    pub id: ColorId,
    pub name: &'static str,
    pub premium: bool,
    pub total: u64,
    pub correct: u64,
    pub incorrect: u64,
}

/// A source-space rectangle of the template that stays within one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub key: TileKey,
}

/// Split a `width x height` image anchored at `anchor` along tile borders.
///
/// Rectangles are produced row by row; together they cover the image exactly
/// once.
pub fn partition(width: u32, height: u32, anchor: TemplateCoords, tile_size: u32) -> Vec<SegmentRect> {
    let mut rects = Vec::new();
    if tile_size == 0 {
        return rects;
    }

    let mut y = 0;
    let mut abs_y = anchor.pixel_y;
    while y < height {
        let seg_h = (tile_size - abs_y % tile_size).min(height - y);

        let mut x = 0;
        let mut abs_x = anchor.pixel_x;
        while x < width {
            let seg_w = (tile_size - abs_x % tile_size).min(width - x);
            rects.push(SegmentRect {
                x,
                y,
                width: seg_w,
                height: seg_h,
                key: TileKey::new(
                    anchor.tile_x + abs_x / tile_size,
                    anchor.tile_y + abs_y / tile_size,
                    abs_x % tile_size,
                    abs_y % tile_size,
                ),
            });
            x += seg_w;
            abs_x += seg_w;
        }

        y += seg_h;
        abs_y += seg_h;
    }

    rects
}

/// Crop `rect` out of `img` and turn each pixel into a centered dot inside a
/// transparent `upscale x upscale` cell.
pub fn shred(img: &RgbaImage, rect: &SegmentRect, upscale: u32) -> RgbaImage {
    let crop = image::imageops::crop_imm(img, rect.x, rect.y, rect.width, rect.height).to_image();
    let mut shredded = upscale_nearest(&crop, upscale);
    apply_center_mask(&mut shredded, upscale);
    shredded
}

/// One shredded tile-aligned piece: the renderable bitmap and the same
/// pixels as packed little-endian words.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    key: TileKey,
    bitmap: RgbaImage,
    pixels: Vec<u32>,
}

impl Segment {
    pub fn new(key: TileKey, bitmap: RgbaImage) -> Self {
        let pixels = pixels_to_u32(bitmap.as_raw());
        Self {
            key,
            bitmap,
            pixels,
        }
    }

    /// Rebuild a segment from its persisted base64 PNG.
    pub fn from_base64(key: TileKey, payload: &str, upscale: u32) -> Result<Self> {
        let bitmap = decode_image(&decode_base64(payload)?)?;
        if upscale == 0 || bitmap.width() % upscale != 0 || bitmap.height() % upscale != 0 {
            return Err(Error::InvalidInput(format!(
                "Tile {} is {}x{}, not a multiple of the upscale factor {}",
                key,
                bitmap.width(),
                bitmap.height(),
                upscale
            )));
        }
        Ok(Self::new(key, bitmap))
    }

    pub fn to_base64(&self) -> Result<String> {
        Ok(encode_base64(&encode_png(&self.bitmap)?))
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn bitmap(&self) -> &RgbaImage {
        &self.bitmap
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    /// Size in canvas pixels (before upscaling).
    pub fn source_size(&self, upscale: u32) -> (u32, u32) {
        (self.width() / upscale, self.height() / upscale)
    }

    /// Packed center pixel of the cell at tile pixel `pixel`, if this segment
    /// covers it.
    pub fn sample(&self, pixel: (u32, u32), upscale: u32) -> Option<u32> {
        let (w, h) = self.source_size(upscale);
        let local_x = pixel.0.checked_sub(self.key.pixel_x)?;
        let local_y = pixel.1.checked_sub(self.key.pixel_y)?;
        if local_x >= w || local_y >= h {
            return None;
        }
        let center = upscale / 2;
        let x = local_x * upscale + center;
        let y = local_y * upscale + center;
        self.pixels
            .get((y * self.width() + x) as usize)
            .copied()
    }
}

/// A user template and its shredded segments.
#[derive(Debug, Clone)]
pub struct Template {
    pub display_name: String,
    /// Draw priority; lower sort ids are drawn first (underneath).
    pub sort_id: u32,
    pub author_id: String,
    /// Absent for templates imported from documents without parsable coords.
    pub coords: Option<TemplateCoords>,
    pub enabled: bool,
    pub pixel_count: PixelCount,
    segments: BTreeMap<TileKey, Segment>,
}

impl Template {
    /// Census and shred a decoded image anchored at `coords`.
    pub fn from_image(
        display_name: impl Into<String>,
        sort_id: u32,
        author_id: impl Into<String>,
        coords: TemplateCoords,
        img: &RgbaImage,
        params: &OverlayParams,
        lookup: &ColorLookup,
    ) -> Self {
        let (width, height) = img.dimensions();
        let pixel_count = PixelCount::census(img, lookup);

        let segments = partition(width, height, coords, params.tile_size)
            .iter()
            .map(|rect| (rect.key, Segment::new(rect.key, shred(img, rect, params.upscale))))
            .collect::<BTreeMap<_, _>>();

        log::debug!(
            "Shredded {}x{} image into {} segments ({} pixels)",
            width,
            height,
            segments.len(),
            pixel_count.total
        );

        Self {
            display_name: display_name.into(),
            sort_id,
            author_id: author_id.into(),
            coords: Some(coords),
            enabled: true,
            pixel_count,
            segments,
        }
    }

    /// Reassemble a template from already-shredded segments.
    pub fn from_segments(
        display_name: impl Into<String>,
        sort_id: u32,
        author_id: impl Into<String>,
        coords: Option<TemplateCoords>,
        pixel_count: PixelCount,
        segments: impl IntoIterator<Item = Segment>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            sort_id,
            author_id: author_id.into(),
            coords,
            enabled: true,
            pixel_count,
            segments: segments.into_iter().map(|s| (s.key(), s)).collect(),
        }
    }

    /// `"<sortID> <authorID>"`, the key used in the persisted document.
    pub fn storage_key(&self) -> String {
        format!("{} {}", self.sort_id, self.author_id)
    }

    /// Split a storage key on its first space into sort id and author id.
    pub fn parse_storage_key(key: &str) -> Option<(u32, String)> {
        let (sort_id, author_id) = key.split_once(' ')?;
        Some((sort_id.trim().parse().ok()?, author_id.to_string()))
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// The segment drawn on tile `(tile_x, tile_y)`. A template rectangle
    /// meets any tile at most once, so the first key match is the only one.
    pub fn segment_on_tile(&self, tile_x: u32, tile_y: u32) -> Option<&Segment> {
        let start = TileKey::new(tile_x, tile_y, 0, 0);
        self.segments
            .range(start..)
            .next()
            .map(|(_, segment)| segment)
            .filter(|segment| segment.key().is_on_tile(tile_x, tile_y))
    }

    /// Replace the correct counts recorded for one tile.
    pub fn record_correct(&mut self, key: TileKey, correct: BTreeMap<ColorId, u64>) {
        self.pixel_count.correct.insert(key, correct);
    }

    /// Every segment as base64 PNG, keyed by its tile key string.
    pub fn encoded_tiles(&self) -> Result<BTreeMap<String, String>> {
        self.segments
            .values()
            .map(|s| Ok((s.key().to_string(), s.to_base64()?)))
            .collect()
    }

    /// Total / correct / incorrect per color, Transparent excluded.
    pub fn color_stats(&self) -> Vec<ColorStat> {
        self.pixel_count
            .colors
            .iter()
            .filter(|(&id, _)| id != TRANSPARENT)
            .map(|(&id, &total)| {
                let correct = self.pixel_count.correct_for(id);
                let entry = find_color(id);
                ColorStat {
                    id,
                    name: entry.map(|c| c.name).unwrap_or("Unknown"),
                    premium: entry.map(|c| c.premium).unwrap_or(false),
                    total,
                    correct,
                    incorrect: total.saturating_sub(correct),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::{OTHER, PALETTE};
    use image::Rgba;

    const RED: Rgba<u8> = Rgba([237, 28, 36, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn lookup() -> ColorLookup {
        ColorLookup::build(PALETTE, 3)
    }

    fn small_params() -> OverlayParams {
        OverlayParams {
            tile_size: 10,
            ..OverlayParams::wplace()
        }
    }

    fn assert_exact_cover(width: u32, height: u32, anchor: TemplateCoords, tile_size: u32) {
        let rects = partition(width, height, anchor, tile_size);
        let mut hits = vec![0u8; (width * height) as usize];
        for r in &rects {
            assert!(r.width <= tile_size && r.height <= tile_size);
            assert!(r.key.pixel_x + r.width <= tile_size);
            assert!(r.key.pixel_y + r.height <= tile_size);
            for y in r.y..r.y + r.height {
                for x in r.x..r.x + r.width {
                    hits[(y * width + x) as usize] += 1;
                }
            }
        }
        assert!(hits.iter().all(|&h| h == 1), "{}x{} at {:?}", width, height, anchor);
    }

    #[test]
    fn test_partition_exact_cover() {
        for &(w, h) in &[(1, 1), (10, 10), (23, 7), (7, 31), (40, 40)] {
            for &(px, py) in &[(0, 0), (9, 9), (3, 8), (5, 0)] {
                assert_exact_cover(w, h, TemplateCoords::new(2, 3, px, py), 10);
            }
        }
    }

    #[test]
    fn test_partition_keys() {
        let rects = partition(15, 4, TemplateCoords::new(5, 6, 8, 7), 10);
        let keys: Vec<String> = rects.iter().map(|r| r.key.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "0005,0006,008,007",
                "0006,0006,000,007",
                "0007,0006,000,007",
                "0005,0007,008,000",
                "0006,0007,000,000",
                "0007,0007,000,000",
            ]
        );
        assert_eq!((rects[0].width, rects[0].height), (2, 3));
        assert_eq!((rects[1].width, rects[1].height), (10, 3));
        assert_eq!((rects[2].width, rects[2].height), (3, 3));
        assert_eq!((rects[3].width, rects[3].height), (2, 1));
    }

    #[test]
    fn test_partition_empty_image() {
        assert!(partition(0, 5, TemplateCoords::new(0, 0, 0, 0), 10).is_empty());
        assert!(partition(5, 0, TemplateCoords::new(0, 0, 0, 0), 10).is_empty());
    }

    #[test]
    fn test_census_total_excludes_transparent() {
        let mut img = RgbaImage::new(4, 2);
        img.put_pixel(0, 0, RED);
        img.put_pixel(1, 0, RED);
        img.put_pixel(2, 0, WHITE);
        img.put_pixel(3, 0, Rgba([245, 28, 36, 255]));
        let count = PixelCount::census(&img, &lookup());
        assert_eq!(count.total_for(7), 2);
        assert_eq!(count.total_for(5), 1);
        assert_eq!(count.total_for(OTHER), 1);
        assert_eq!(count.total_for(TRANSPARENT), 4);
        assert_eq!(count.total, 4);
        let summed: u64 = count.colors.iter().filter(|(&id, _)| id != TRANSPARENT).map(|(_, n)| n).sum();
        assert_eq!(count.total, summed);
    }

    #[test]
    fn test_from_image_shreds_segments() {
        let img = RgbaImage::from_pixel(12, 3, RED);
        let params = small_params();
        let template = Template::from_image("t", 0, "!", TemplateCoords::new(1, 1, 5, 0), &img, &params, &lookup());

        assert_eq!(template.segment_count(), 2);
        let first = template.segment_on_tile(1, 1).unwrap();
        let second = template.segment_on_tile(2, 1).unwrap();
        assert_eq!(first.bitmap().dimensions(), (15, 9));
        assert_eq!(second.bitmap().dimensions(), (21, 9));
        assert_eq!(first.pixels().len(), (15 * 9) as usize);
        assert!(template.segment_on_tile(3, 1).is_none());

        // one opaque dot per source pixel, at the cell center
        let dots = first.bitmap().pixels().filter(|p| p[3] != 0).count();
        assert_eq!(dots, 5 * 3);
        assert_eq!(*first.bitmap().get_pixel(1, 1), RED);
        assert_eq!(first.bitmap().get_pixel(0, 0)[3], 0);
        assert_eq!(template.pixel_count.total, 36);
    }

    #[test]
    fn test_transparent_segment_still_produced() {
        let img = RgbaImage::new(4, 4);
        let template = Template::from_image("empty", 0, "!", TemplateCoords::new(0, 0, 8, 0), &img, &small_params(), &lookup());
        assert_eq!(template.segment_count(), 2);
        assert_eq!(template.pixel_count.total, 0);
        assert!(template.color_stats().is_empty());
    }

    #[test]
    fn test_segment_sample() {
        let mut img = RgbaImage::from_pixel(3, 2, WHITE);
        img.put_pixel(2, 1, RED);
        let template = Template::from_image("t", 0, "!", TemplateCoords::new(0, 0, 4, 4), &img, &small_params(), &lookup());
        let segment = template.segment_on_tile(0, 0).unwrap();
        assert_eq!(segment.sample((6, 5), 3), Some(u32::from_le_bytes(RED.0)));
        assert_eq!(segment.sample((4, 4), 3), Some(u32::from_le_bytes(WHITE.0)));
        assert_eq!(segment.sample((7, 4), 3), None);
        assert_eq!(segment.sample((3, 4), 3), None);
    }

    #[test]
    fn test_segment_base64_round_trip() {
        let img = RgbaImage::from_fn(4, 3, |x, y| Rgba([x as u8 * 40, y as u8 * 60, 9, 200]));
        let template = Template::from_image("t", 0, "!", TemplateCoords::new(0, 0, 0, 0), &img, &small_params(), &lookup());
        let segment = template.segment_on_tile(0, 0).unwrap();
        let restored = Segment::from_base64(segment.key(), &segment.to_base64().unwrap(), 3).unwrap();
        assert_eq!(restored.pixels(), segment.pixels());
        assert_eq!(&restored, segment);
    }

    #[test]
    fn test_segment_rejects_wrong_scale() {
        let bitmap = RgbaImage::new(4, 3);
        let payload = encode_base64(&encode_png(&bitmap).unwrap());
        assert!(Segment::from_base64(TileKey::new(0, 0, 0, 0), &payload, 3).is_err());
    }

    #[test]
    fn test_storage_key() {
        assert_eq!(Template::parse_storage_key("3 a b"), Some((3, "a b".to_string())));
        assert_eq!(Template::parse_storage_key("x !"), None);
        assert_eq!(Template::parse_storage_key("3"), None);
    }

    #[test]
    fn test_color_stats() {
        let mut img = RgbaImage::from_pixel(2, 1, RED);
        img.put_pixel(1, 0, WHITE);
        let mut template = Template::from_image("t", 0, "!", TemplateCoords::new(0, 0, 0, 0), &img, &small_params(), &lookup());
        template.record_correct(TileKey::new(0, 0, 0, 0), [(7, 1)].into_iter().collect());
        let stats = template.color_stats();
        assert_eq!(stats.len(), 2);
        let red = stats.iter().find(|s| s.id == 7).unwrap();
        assert_eq!((red.total, red.correct, red.incorrect), (1, 1, 0));
        let white = stats.iter().find(|s| s.id == 5).unwrap();
        assert_eq!((white.total, white.correct, white.incorrect), (1, 0, 1));
        assert_eq!(template.pixel_count.correct_total(), 1);
    }
}
