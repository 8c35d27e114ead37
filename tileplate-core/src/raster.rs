/// Integer pixel operations on RGBA bitmaps used by tiling and compositing.
///
/// No resampling filters: scaling is pure block replication.
use image::{Rgba, RgbaImage};
use std::collections::BTreeSet;

use crate::palette::{ColorId, ColorLookup};

const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Upscale by an integer factor, replicating each pixel into a `factor²` block.
pub fn upscale_nearest(src: &RgbaImage, factor: u32) -> RgbaImage {
    let (w, h) = src.dimensions();
    upscale_into(src, factor, w * factor, h * factor)
}

/// Upscale onto a fixed `width x height` canvas. Source pixels that land
/// outside are dropped; uncovered canvas stays transparent.
pub fn upscale_into(src: &RgbaImage, factor: u32, width: u32, height: u32) -> RgbaImage {
    let mut out = RgbaImage::new(width, height);
    if factor == 0 {
        return out;
    }

    let (sw, sh) = src.dimensions();
    let cols = sw.min(width.div_ceil(factor));
    let rows = sh.min(height.div_ceil(factor));

    for sy in 0..rows {
        for sx in 0..cols {
            let pixel = *src.get_pixel(sx, sy);
            let x0 = sx * factor;
            let y0 = sy * factor;
            for y in y0..(y0 + factor).min(height) {
                for x in x0..(x0 + factor).min(width) {
                    out.put_pixel(x, y, pixel);
                }
            }
        }
    }

    out
}

/// Keep only the center pixel of every `factor x factor` block; everything
/// else becomes fully transparent.
pub fn apply_center_mask(img: &mut RgbaImage, factor: u32) {
    if factor <= 1 {
        return;
    }
    let center = factor / 2;
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        if x % factor != center || y % factor != center {
            *pixel = CLEAR;
        }
    }
}

/// Source-over draw of `top` onto `canvas` with its top-left at `(x, y)`.
/// Opaque pixels overwrite, clear pixels leave the canvas untouched.
pub fn draw_over(canvas: &mut RgbaImage, top: &RgbaImage, x: u32, y: u32) {
    let (cw, ch) = canvas.dimensions();
    for (tx, ty, src) in top.enumerate_pixels() {
        let (cx, cy) = (x + tx, y + ty);
        if cx >= cw || cy >= ch {
            continue;
        }
        match src[3] {
            0 => {}
            255 => canvas.put_pixel(cx, cy, *src),
            alpha => {
                let dst = canvas.get_pixel_mut(cx, cy);
                *dst = blend(*dst, *src, alpha);
            }
        }
    }
}

fn blend(dst: Rgba<u8>, src: Rgba<u8>, src_a: u8) -> Rgba<u8> {
    let sa = src_a as u32;
    let da = dst[3] as u32 * (255 - sa) / 255;
    let out_a = sa + da;
    if out_a == 0 {
        return CLEAR;
    }
    let mix = |c: usize| ((src[c] as u32 * sa + dst[c] as u32 * da) / out_a) as u8;
    Rgba([mix(0), mix(1), mix(2), out_a as u8])
}

/// Copy of `img` with every pixel resolving to a filtered color cleared.
pub fn strip_colors(img: &RgbaImage, lookup: &ColorLookup, filtered: &BTreeSet<ColorId>) -> RgbaImage {
    let mut out = img.clone();
    if filtered.is_empty() {
        return out;
    }
    for pixel in out.pixels_mut() {
        if pixel[3] != 0 && filtered.contains(&lookup.match_rgba(pixel.0)) {
            *pixel = CLEAR;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::PALETTE;

    fn checker(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([x as u8 * 10, y as u8 * 10, 7, 255]))
    }

    #[test]
    fn test_upscale_replicates_blocks() {
        let src = checker(2, 2);
        let out = upscale_nearest(&src, 3);
        assert_eq!(out.dimensions(), (6, 6));
        for y in 0..6 {
            for x in 0..6 {
                assert_eq!(out.get_pixel(x, y), src.get_pixel(x / 3, y / 3));
            }
        }
    }

    #[test]
    fn test_upscale_into_clips_and_pads() {
        let src = checker(4, 1);
        let out = upscale_into(&src, 3, 7, 5);
        assert_eq!(out.dimensions(), (7, 5));
        // column 6 belongs to source column 2, rows 3..5 are past the source
        assert_eq!(out.get_pixel(6, 0), src.get_pixel(2, 0));
        assert_eq!(out.get_pixel(6, 3)[3], 0);
    }

    #[test]
    fn test_center_mask() {
        let mut img = upscale_nearest(&checker(2, 1), 3);
        apply_center_mask(&mut img, 3);
        let opaque: Vec<(u32, u32)> = img
            .enumerate_pixels()
            .filter(|(_, _, p)| p[3] != 0)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert_eq!(opaque, vec![(1, 1), (4, 1)]);
    }

    #[test]
    fn test_mask_factor_one_is_noop() {
        let src = checker(3, 3);
        let mut img = src.clone();
        apply_center_mask(&mut img, 1);
        assert_eq!(img, src);
    }

    #[test]
    fn test_draw_over() {
        let mut canvas = RgbaImage::from_pixel(3, 3, Rgba([10, 20, 30, 255]));
        let mut top = RgbaImage::new(2, 2);
        top.put_pixel(0, 0, Rgba([200, 100, 50, 255]));
        top.put_pixel(1, 1, Rgba([0, 0, 0, 255]));
        draw_over(&mut canvas, &top, 2, 1);
        assert_eq!(*canvas.get_pixel(2, 1), Rgba([200, 100, 50, 255]));
        // clear top pixel keeps the canvas; (3, 2) is off-canvas
        assert_eq!(*canvas.get_pixel(2, 2), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_draw_over_blends_partial_alpha() {
        let mut canvas = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let top = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 51]));
        draw_over(&mut canvas, &top, 0, 0);
        assert_eq!(*canvas.get_pixel(0, 0), Rgba([51, 51, 51, 255]));
    }

    #[test]
    fn test_strip_colors() {
        let lookup = ColorLookup::build(PALETTE, 0);
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([237, 28, 36, 255]));
        img.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
        let filtered: BTreeSet<ColorId> = [7].into_iter().collect();
        let out = strip_colors(&img, &lookup, &filtered);
        assert_eq!(out.get_pixel(0, 0)[3], 0);
        assert_eq!(out.get_pixel(1, 0), img.get_pixel(1, 0));
    }
}
