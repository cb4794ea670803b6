//! Frame annotation and placeholder synthesis
//!
//! Draws track boxes, identity labels, and tripwire lines onto RGB frames
//! before JPEG encoding, and synthesizes the "NO SIGNAL" / error frames
//! shown while capture is down. Labels use a built-in 5x7 bitmap font so
//! the preview needs no font assets.

use super::tracker::Track;
use crate::config::{Tripwire, TripwireOrientation};
use crate::error::{Error, Result};
use bytes::Bytes;
use image::{Rgb, RgbImage};

const COLOR_IDENTIFIED: Rgb<u8> = Rgb([40, 220, 60]);
const COLOR_UNKNOWN: Rgb<u8> = Rgb([240, 200, 40]);
const COLOR_TRIPWIRE: Rgb<u8> = Rgb([230, 60, 60]);
const COLOR_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const COLOR_ALERT: Rgb<u8> = Rgb([200, 40, 40]);

/// Draw tripwire lines and track boxes with labels onto `img`
pub fn draw_overlays(img: &mut RgbImage, tracks: &[Track], tripwires: &[Tripwire]) {
    let (width, height) = img.dimensions();

    for tripwire in tripwires {
        // Spacing doubles as the drawn line thickness
        let thickness = match tripwire.orientation {
            TripwireOrientation::Horizontal => {
                ((tripwire.spacing * height as f32) as u32).clamp(2, 12)
            }
            TripwireOrientation::Vertical => ((tripwire.spacing * width as f32) as u32).clamp(2, 12),
        };
        match tripwire.orientation {
            TripwireOrientation::Horizontal => {
                let y = (tripwire.position * height as f32) as u32;
                fill_rect(
                    img,
                    0,
                    y.saturating_sub(thickness / 2),
                    width,
                    thickness,
                    COLOR_TRIPWIRE,
                );
                draw_text(img, 4, y.saturating_sub(thickness / 2 + 10), 1, COLOR_TRIPWIRE, &tripwire.name);
            }
            TripwireOrientation::Vertical => {
                let x = (tripwire.position * width as f32) as u32;
                fill_rect(
                    img,
                    x.saturating_sub(thickness / 2),
                    0,
                    thickness,
                    height,
                    COLOR_TRIPWIRE,
                );
                draw_text(img, x.saturating_add(thickness), 4, 1, COLOR_TRIPWIRE, &tripwire.name);
            }
        }
    }

    for track in tracks {
        let color = if track.identity.is_some() {
            COLOR_IDENTIFIED
        } else {
            COLOR_UNKNOWN
        };
        let x1 = track.bbox.x1.max(0.0) as u32;
        let y1 = track.bbox.y1.max(0.0) as u32;
        let x2 = (track.bbox.x2.max(0.0) as u32).min(width.saturating_sub(1));
        let y2 = (track.bbox.y2.max(0.0) as u32).min(height.saturating_sub(1));
        draw_rect(img, x1, y1, x2, y2, 2, color);

        let label = match &track.identity {
            Some(identity) => format!("{} {:.2}", identity.employee_id, identity.score),
            None => format!("#{}", track.id),
        };
        draw_text(img, x1, y1.saturating_sub(10), 1, color, &label.to_uppercase());
    }
}

/// Dark placeholder frame carrying a centered message
pub fn placeholder_image(width: u32, height: u32, message: &str) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([16, 16, 20]));

    let scale = 2u32;
    let text = message.to_uppercase();
    let text_w = (text.len() as u32) * 6 * scale;
    let x = width.saturating_sub(text_w) / 2;
    let y = height.saturating_sub(7 * scale) / 2;
    draw_text(&mut img, x, y, scale, COLOR_ALERT, &text);

    img
}

/// Encode to JPEG at the given quality
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Bytes> {
    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality);
    encoder
        .encode_image(img)
        .map_err(|e| Error::Internal(format!("JPEG encode failed: {e}")))?;
    Ok(Bytes::from(jpeg))
}

fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let (width, height) = img.dimensions();
    for yy in y..(y + h).min(height) {
        for xx in x..(x + w).min(width) {
            img.put_pixel(xx, yy, color);
        }
    }
}

/// Rectangle outline with the given border thickness
fn draw_rect(img: &mut RgbImage, x1: u32, y1: u32, x2: u32, y2: u32, border: u32, color: Rgb<u8>) {
    if x2 <= x1 || y2 <= y1 {
        return;
    }
    let w = x2 - x1;
    let h = y2 - y1;
    fill_rect(img, x1, y1, w, border, color);
    fill_rect(img, x1, y2.saturating_sub(border), w, border, color);
    fill_rect(img, x1, y1, border, h, color);
    fill_rect(img, x2.saturating_sub(border), y1, border, h, color);
}

/// Render `text` with the built-in font; 6*scale pixels per column
pub fn draw_text(img: &mut RgbImage, x: u32, y: u32, scale: u32, color: Rgb<u8>, text: &str) {
    let mut cursor = x;
    for ch in text.chars() {
        let glyph = glyph_for(ch);
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..5u32 {
                if bits & (0b10000 >> col) != 0 {
                    fill_rect(
                        img,
                        cursor + col * scale,
                        y + row as u32 * scale,
                        scale,
                        scale,
                        color,
                    );
                }
            }
        }
        cursor += 6 * scale;
    }
}

/// 5x7 glyphs, one u8 row each, high bit = leftmost column
fn glyph_for(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1B, 0x11],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        ':' => [0x00, 0x04, 0x00, 0x00, 0x00, 0x04, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
        '#' => [0x0A, 0x0A, 0x1F, 0x0A, 0x1F, 0x0A, 0x0A],
        '?' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
        _ => [0x00; 7],
    }
}
