//! Byte-level helpers: base64, lossless image encoding, packed pixel buffers
//! and the compact integer encoding used for author ids.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

use crate::error::{Error, Result};

/// Printable ASCII without space, `"` and `\`. 92 symbols.
pub const ENCODING_BASE: &str =
    "!#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[]^_`abcdefghijklmnopqrstuvwxyz{|}~";

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(encoded.trim())?)
}

/// Encode an RGBA bitmap as PNG.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    img.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(Error::Encode)?;
    Ok(output)
}

/// Decode any supported image format into RGBA8.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory(bytes).map_err(Error::Decode)?;
    Ok(img.to_rgba8())
}

/// Decode a user upload, honouring its EXIF orientation tag when present.
pub fn decode_upload(bytes: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory(bytes).map_err(Error::Decode)?;
    let img = match exif_orientation(bytes) {
        Some(orientation) => {
            log::debug!("Applying EXIF orientation {}", orientation);
            orient(img, orientation)
        }
        None => img,
    };
    Ok(img.to_rgba8())
}

/// EXIF orientation in 2..=8, or None when missing, unreadable or normal.
fn exif_orientation(bytes: &[u8]) -> Option<u32> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    field.value.get_uint(0).filter(|o| (2..=8).contains(o))
}

fn orient(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate270().fliph(),
        6 => img.rotate90(),
        7 => img.rotate90().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Reinterpret an RGBA byte buffer as little-endian 32-bit words.
pub fn pixels_to_u32(rgba: &[u8]) -> Vec<u32> {
    rgba.chunks_exact(4)
        .map(|px| u32::from_le_bytes([px[0], px[1], px[2], px[3]]))
        .collect()
}

/// Encode a number in the positional system given by `alphabet`.
///
/// Returns an empty string for an empty alphabet.
pub fn number_to_encoded(mut number: u64, alphabet: &str) -> String {
    let symbols: Vec<char> = alphabet.chars().collect();
    let base = symbols.len() as u64;
    if base == 0 {
        return String::new();
    }
    if number == 0 {
        return symbols[0].to_string();
    }

    let mut digits = Vec::new();
    while number > 0 {
        digits.push(symbols[(number % base) as usize]);
        number /= base;
    }
    digits.iter().rev().collect()
}

/// Inverse of [`number_to_encoded`]. None on unknown symbols or overflow.
pub fn encoded_to_number(encoded: &str, alphabet: &str) -> Option<u64> {
    let symbols: Vec<char> = alphabet.chars().collect();
    let base = symbols.len() as u64;
    if base == 0 || encoded.is_empty() {
        return None;
    }

    encoded.chars().try_fold(0u64, |acc, ch| {
        let digit = symbols.iter().position(|&s| s == ch)? as u64;
        acc.checked_mul(base)?.checked_add(digit)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_alphabet_size() {
        assert_eq!(ENCODING_BASE.chars().count(), 92);
        assert!(!ENCODING_BASE.contains(' '));
    }

    #[test]
    fn test_number_encoding() {
        assert_eq!(number_to_encoded(0, ENCODING_BASE), "!");
        assert_eq!(number_to_encoded(1, ENCODING_BASE), "#");
        assert_eq!(number_to_encoded(92, ENCODING_BASE), "#!");
        assert_eq!(number_to_encoded(5, "01"), "101");
        assert_eq!(number_to_encoded(7, ""), "");
    }

    #[test]
    fn test_number_decoding() {
        for n in [0u64, 1, 91, 92, 12_345_678, u64::MAX] {
            let encoded = number_to_encoded(n, ENCODING_BASE);
            assert_eq!(encoded_to_number(&encoded, ENCODING_BASE), Some(n));
        }
        assert_eq!(encoded_to_number("2", "01"), None);
        assert_eq!(encoded_to_number("", ENCODING_BASE), None);
    }

    #[test]
    fn test_pixels_to_u32() {
        let words = pixels_to_u32(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(words, vec![0x0403_0201, 0x0807_0605]);
    }

    #[test]
    fn test_png_base64_lossless() {
        let mut img = RgbaImage::new(5, 4);
        img.put_pixel(0, 0, Rgba([237, 28, 36, 255]));
        img.put_pixel(4, 3, Rgba([1, 2, 3, 7]));
        img.put_pixel(2, 1, Rgba([255, 255, 255, 128]));

        let encoded = encode_base64(&encode_png(&img).unwrap());
        let decoded = decode_image(&decode_base64(&encoded).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (5, 4));
        assert_eq!(decoded.as_raw(), img.as_raw());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(decode_image(b"not an image"), Err(Error::Decode(_))));
        assert!(matches!(decode_base64("@@@"), Err(Error::Base64(_))));
    }

    #[test]
    fn test_upload_without_exif_is_unchanged() {
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(2, 0, Rgba([9, 9, 9, 255]));
        let bytes = encode_png(&img).unwrap();
        assert_eq!(decode_upload(&bytes).unwrap().as_raw(), img.as_raw());
    }

    #[test]
    fn test_orientation_transform() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([1, 0, 0, 255]));
        let rotated = orient(DynamicImage::ImageRgba8(img), 6).to_rgba8();
        assert_eq!(rotated.dimensions(), (1, 2));
        assert_eq!(rotated.get_pixel(0, 0)[0], 1);
    }
}
