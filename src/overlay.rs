use crate::models::{BoundingBox, Detection};
use crate::presentation::emotion_color;
use image::{Rgba, RgbaImage};

const OUTLINE_RADIUS: f32 = 10.0;
const OUTLINE_THICKNESS: u32 = 3;
const BRACKET_LEN: f32 = 15.0;
const BRACKET_THICKNESS: u32 = 4;

/// Sets a pixel if it lies inside the image.
fn put(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    if x >= 0 && y >= 0 && (x as u64) < w as u64 && (y as u64) < h as u64 {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn hline(img: &mut RgbaImage, x0: f32, x1: f32, y: f32, color: Rgba<u8>) {
    let (a, b) = (x0.min(x1).round() as i64, x0.max(x1).round() as i64);
    for x in a..=b {
        put(img, x, y.round() as i64, color);
    }
}

fn vline(img: &mut RgbaImage, x: f32, y0: f32, y1: f32, color: Rgba<u8>) {
    let (a, b) = (y0.min(y1).round() as i64, y0.max(y1).round() as i64);
    for y in a..=b {
        put(img, x.round() as i64, y, color);
    }
}

/// Quarter arc around (cx, cy) between two angles (radians).
fn arc(img: &mut RgbaImage, cx: f32, cy: f32, r: f32, from: f32, to: f32, color: Rgba<u8>) {
    let steps = ((r * 4.0).ceil() as usize).max(8);
    for i in 0..=steps {
        let t = from + (to - from) * i as f32 / steps as f32;
        put(
            img,
            (cx + r * t.cos()).round() as i64,
            (cy + r * t.sin()).round() as i64,
            color,
        );
    }
}

/// Draw a rounded-corner box outline; the radius shrinks for small boxes.
pub fn draw_rounded_box(
    img: &mut RgbaImage,
    bbox: BoundingBox,
    radius: f32,
    thickness: u32,
    color: Rgba<u8>,
) {
    use std::f32::consts::{FRAC_PI_2, PI};

    for t in 0..thickness {
        let inset = t as f32;
        let x0 = bbox.x + inset;
        let y0 = bbox.y + inset;
        let x1 = bbox.x + bbox.width - inset;
        let y1 = bbox.y + bbox.height - inset;
        if x1 <= x0 || y1 <= y0 {
            break;
        }
        let r = radius.min((x1 - x0) / 2.0).min((y1 - y0) / 2.0).max(0.0);

        hline(img, x0 + r, x1 - r, y0, color);
        hline(img, x0 + r, x1 - r, y1, color);
        vline(img, x0, y0 + r, y1 - r, color);
        vline(img, x1, y0 + r, y1 - r, color);
        if r > 0.0 {
            arc(img, x0 + r, y0 + r, r, PI, PI + FRAC_PI_2, color);
            arc(img, x1 - r, y0 + r, r, -FRAC_PI_2, 0.0, color);
            arc(img, x1 - r, y1 - r, r, 0.0, FRAC_PI_2, color);
            arc(img, x0 + r, y1 - r, r, FRAC_PI_2, PI, color);
        }
    }
}

/// Draw L-shaped brackets of length `len` on the four corners.
pub fn draw_corner_brackets(
    img: &mut RgbaImage,
    bbox: BoundingBox,
    len: f32,
    thickness: u32,
    color: Rgba<u8>,
) {
    let x0 = bbox.x;
    let y0 = bbox.y;
    let x1 = bbox.x + bbox.width;
    let y1 = bbox.y + bbox.height;
    let len = len.min(bbox.width).min(bbox.height).max(0.0);

    for t in 0..thickness {
        let o = t as f32;
        // top-left
        vline(img, x0 + o, y0, y0 + len, color);
        hline(img, x0, x0 + len, y0 + o, color);
        // top-right
        hline(img, x1 - len, x1, y0 + o, color);
        vline(img, x1 - o, y0, y0 + len, color);
        // bottom-left
        vline(img, x0 + o, y1 - len, y1, color);
        hline(img, x0, x0 + len, y1 - o, color);
        // bottom-right
        hline(img, x1 - len, x1, y1 - o, color);
        vline(img, x1 - o, y1 - len, y1, color);
    }
}

/// Draws every detection in its dominant emotion's colour.
///
/// Boxes are expected in the image's own pixel space.
pub fn annotate(img: &mut RgbaImage, detections: &[Detection]) {
    for detection in detections {
        let label = detection
            .scores
            .dominant()
            .map(|d| d.label)
            .unwrap_or_default();
        let [r, g, b] = emotion_color(&label);
        let color = Rgba([r, g, b, 255]);
        draw_rounded_box(img, detection.bbox, OUTLINE_RADIUS, OUTLINE_THICKNESS, color);
        draw_corner_brackets(img, detection.bbox, BRACKET_LEN, BRACKET_THICKNESS, color);
    }
}
