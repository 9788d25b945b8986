//! Status overlay drawn onto the annotated frame: detection outline,
//! one-line status text, and the recording indicator.

use crate::geometry::{Corners, Point};
use image::{Rgb, RgbImage};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const AMBER: Rgb<u8> = Rgb([255, 165, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

/// Shared status the supervisor writes and the camera loop reads each
/// frame when rendering the overlay.
#[derive(Default)]
pub struct StationStatus {
    message: RwLock<String>,
    processing: AtomicBool,
    recording: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub message: String,
    pub processing: bool,
    pub recording: bool,
}

impl StationStatus {
    pub fn new() -> Self {
        Self {
            message: RwLock::new("Ready".to_string()),
            processing: AtomicBool::new(false),
            recording: AtomicBool::new(false),
        }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        *self.message.write() = message.into();
    }

    pub fn set_processing(&self, processing: bool) {
        self.processing.store(processing, Ordering::Relaxed);
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::Relaxed);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            message: self.message.read().clone(),
            processing: self.processing.load(Ordering::Relaxed),
            recording: self.recording.load(Ordering::Relaxed),
        }
    }
}

/// Render the status line and, while recording, the red REC marker.
pub fn draw_status(img: &mut RgbImage, status: &StatusSnapshot) {
    let color = if status.processing { AMBER } else { GREEN };
    draw_text(img, &format!("Status: {}", status.message), 20, 28, 2, color);

    if status.recording {
        fill_circle(img, 50, 80, 15, RED);
        draw_text(img, "REC", 80, 74, 2, RED);
    }
}

/// Outline the detected quad; fresh detections draw green, carried
/// corners yellow.
pub fn draw_quad(img: &mut RgbImage, quad: &Corners, fresh: bool) {
    let color = if fresh { GREEN } else { YELLOW };
    let pts = quad.as_array();
    for i in 0..4 {
        draw_line(img, pts[i], pts[(i + 1) % 4], color);
    }
    for p in pts {
        fill_circle(img, p.x.round() as i32, p.y.round() as i32, 5, color);
    }
}

pub fn draw_line(img: &mut RgbImage, a: Point, b: Point, color: Rgb<u8>) {
    // Bresenham over rounded endpoints.
    let (mut x0, mut y0) = (a.x.round() as i64, a.y.round() as i64);
    let (x1, y1) = (b.x.round() as i64, b.y.round() as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put_px(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

pub fn fill_circle(img: &mut RgbImage, cx: i32, cy: i32, r: i32, color: Rgb<u8>) {
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                put_px(img, (cx + dx) as i64, (cy + dy) as i64, color);
            }
        }
    }
}

fn put_px(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Draw ASCII text with the built-in 5×7 font. Non-ASCII characters
/// render as a hollow box so CJK status strings stay legible in length.
pub fn draw_text(img: &mut RgbImage, text: &str, x: i32, y: i32, scale: i32, color: Rgb<u8>) {
    let mut cursor = x;
    for ch in text.chars() {
        let code = ch as u32;
        if (0x20..0x7f).contains(&code) {
            draw_glyph(img, &FONT_5X7[(code - 0x20) as usize], cursor, y, scale, color);
        } else {
            draw_box_glyph(img, cursor, y, scale, color);
        }
        cursor += 6 * scale;
    }
}

fn draw_glyph(img: &mut RgbImage, glyph: &[u8; 5], x: i32, y: i32, scale: i32, color: Rgb<u8>) {
    for (col, bits) in glyph.iter().enumerate() {
        for row in 0..7i32 {
            if (bits >> row) & 1 != 0 {
                for sy in 0..scale {
                    for sx in 0..scale {
                        put_px(
                            img,
                            (x + col as i32 * scale + sx) as i64,
                            (y + row * scale + sy) as i64,
                            color,
                        );
                    }
                }
            }
        }
    }
}

fn draw_box_glyph(img: &mut RgbImage, x: i32, y: i32, scale: i32, color: Rgb<u8>) {
    let w = 5 * scale;
    let h = 7 * scale;
    let (xf, yf) = (x as f32, y as f32);
    draw_line(img, Point::new(xf, yf), Point::new(xf + w as f32, yf), color);
    draw_line(
        img,
        Point::new(xf + w as f32, yf),
        Point::new(xf + w as f32, yf + h as f32),
        color,
    );
    draw_line(
        img,
        Point::new(xf + w as f32, yf + h as f32),
        Point::new(xf, yf + h as f32),
        color,
    );
    draw_line(img, Point::new(xf, yf + h as f32), Point::new(xf, yf), color);
}

/// Classic 5×7 column-major bitmap font, ASCII 0x20–0x7E. Bit 0 is the
/// top row of each column.
#[rustfmt::skip]
const FONT_5X7: [[u8; 5]; 95] = [
    [0x00, 0x00, 0x00, 0x00, 0x00], // ' '
    [0x00, 0x00, 0x5f, 0x00, 0x00], // '!'
    [0x00, 0x07, 0x00, 0x07, 0x00], // '"'
    [0x14, 0x7f, 0x14, 0x7f, 0x14], // '#'
    [0x24, 0x2a, 0x7f, 0x2a, 0x12], // '$'
    [0x23, 0x13, 0x08, 0x64, 0x62], // '%'
    [0x36, 0x49, 0x55, 0x22, 0x50], // '&'
    [0x00, 0x05, 0x03, 0x00, 0x00], // '\''
    [0x00, 0x1c, 0x22, 0x41, 0x00], // '('
    [0x00, 0x41, 0x22, 0x1c, 0x00], // ')'
    [0x14, 0x08, 0x3e, 0x08, 0x14], // '*'
    [0x08, 0x08, 0x3e, 0x08, 0x08], // '+'
    [0x00, 0x50, 0x30, 0x00, 0x00], // ','
    [0x08, 0x08, 0x08, 0x08, 0x08], // '-'
    [0x00, 0x60, 0x60, 0x00, 0x00], // '.'
    [0x20, 0x10, 0x08, 0x04, 0x02], // '/'
    [0x3e, 0x51, 0x49, 0x45, 0x3e], // '0'
    [0x00, 0x42, 0x7f, 0x40, 0x00], // '1'
    [0x42, 0x61, 0x51, 0x49, 0x46], // '2'
    [0x21, 0x41, 0x45, 0x4b, 0x31], // '3'
    [0x18, 0x14, 0x12, 0x7f, 0x10], // '4'
    [0x27, 0x45, 0x45, 0x45, 0x39], // '5'
    [0x3c, 0x4a, 0x49, 0x49, 0x30], // '6'
    [0x01, 0x71, 0x09, 0x05, 0x03], // '7'
    [0x36, 0x49, 0x49, 0x49, 0x36], // '8'
    [0x06, 0x49, 0x49, 0x29, 0x1e], // '9'
    [0x00, 0x36, 0x36, 0x00, 0x00], // ':'
    [0x00, 0x56, 0x36, 0x00, 0x00], // ';'
    [0x08, 0x14, 0x22, 0x41, 0x00], // '<'
    [0x14, 0x14, 0x14, 0x14, 0x14], // '='
    [0x00, 0x41, 0x22, 0x14, 0x08], // '>'
    [0x02, 0x01, 0x51, 0x09, 0x06], // '?'
    [0x32, 0x49, 0x79, 0x41, 0x3e], // '@'
    [0x7e, 0x11, 0x11, 0x11, 0x7e], // 'A'
    [0x7f, 0x49, 0x49, 0x49, 0x36], // 'B'
    [0x3e, 0x41, 0x41, 0x41, 0x22], // 'C'
    [0x7f, 0x41, 0x41, 0x22, 0x1c], // 'D'
    [0x7f, 0x49, 0x49, 0x49, 0x41], // 'E'
    [0x7f, 0x09, 0x09, 0x09, 0x01], // 'F'
    [0x3e, 0x41, 0x49, 0x49, 0x7a], // 'G'
    [0x7f, 0x08, 0x08, 0x08, 0x7f], // 'H'
    [0x00, 0x41, 0x7f, 0x41, 0x00], // 'I'
    [0x20, 0x40, 0x41, 0x3f, 0x01], // 'J'
    [0x7f, 0x08, 0x14, 0x22, 0x41], // 'K'
    [0x7f, 0x40, 0x40, 0x40, 0x40], // 'L'
    [0x7f, 0x02, 0x0c, 0x02, 0x7f], // 'M'
    [0x7f, 0x04, 0x08, 0x10, 0x7f], // 'N'
    [0x3e, 0x41, 0x41, 0x41, 0x3e], // 'O'
    [0x7f, 0x09, 0x09, 0x09, 0x06], // 'P'
    [0x3e, 0x41, 0x51, 0x21, 0x5e], // 'Q'
    [0x7f, 0x09, 0x19, 0x29, 0x46], // 'R'
    [0x46, 0x49, 0x49, 0x49, 0x31], // 'S'
    [0x01, 0x01, 0x7f, 0x01, 0x01], // 'T'
    [0x3f, 0x40, 0x40, 0x40, 0x3f], // 'U'
    [0x1f, 0x20, 0x40, 0x20, 0x1f], // 'V'
    [0x3f, 0x40, 0x38, 0x40, 0x3f], // 'W'
    [0x63, 0x14, 0x08, 0x14, 0x63], // 'X'
    [0x07, 0x08, 0x70, 0x08, 0x07], // 'Y'
    [0x61, 0x51, 0x49, 0x45, 0x43], // 'Z'
    [0x00, 0x7f, 0x41, 0x41, 0x00], // '['
    [0x02, 0x04, 0x08, 0x10, 0x20], // '\\'
    [0x00, 0x41, 0x41, 0x7f, 0x00], // ']'
    [0x04, 0x02, 0x01, 0x02, 0x04], // '^'
    [0x40, 0x40, 0x40, 0x40, 0x40], // '_'
    [0x00, 0x01, 0x02, 0x04, 0x00], // '`'
    [0x20, 0x54, 0x54, 0x54, 0x78], // 'a'
    [0x7f, 0x48, 0x44, 0x44, 0x38], // 'b'
    [0x38, 0x44, 0x44, 0x44, 0x20], // 'c'
    [0x38, 0x44, 0x44, 0x48, 0x7f], // 'd'
    [0x38, 0x54, 0x54, 0x54, 0x18], // 'e'
    [0x08, 0x7e, 0x09, 0x01, 0x02], // 'f'
    [0x0c, 0x52, 0x52, 0x52, 0x3e], // 'g'
    [0x7f, 0x08, 0x04, 0x04, 0x78], // 'h'
    [0x00, 0x44, 0x7d, 0x40, 0x00], // 'i'
    [0x20, 0x40, 0x44, 0x3d, 0x00], // 'j'
    [0x7f, 0x10, 0x28, 0x44, 0x00], // 'k'
    [0x00, 0x41, 0x7f, 0x40, 0x00], // 'l'
    [0x7c, 0x04, 0x18, 0x04, 0x78], // 'm'
    [0x7c, 0x08, 0x04, 0x04, 0x78], // 'n'
    [0x38, 0x44, 0x44, 0x44, 0x38], // 'o'
    [0x7c, 0x14, 0x14, 0x14, 0x08], // 'p'
    [0x08, 0x14, 0x14, 0x18, 0x7c], // 'q'
    [0x7c, 0x08, 0x04, 0x04, 0x08], // 'r'
    [0x48, 0x54, 0x54, 0x54, 0x20], // 's'
    [0x04, 0x3f, 0x44, 0x40, 0x20], // 't'
    [0x3c, 0x40, 0x40, 0x20, 0x7c], // 'u'
    [0x1c, 0x20, 0x40, 0x20, 0x1c], // 'v'
    [0x3c, 0x40, 0x30, 0x40, 0x3c], // 'w'
    [0x44, 0x28, 0x10, 0x28, 0x44], // 'x'
    [0x0c, 0x50, 0x50, 0x50, 0x3c], // 'y'
    [0x44, 0x64, 0x54, 0x4c, 0x44], // 'z'
    [0x00, 0x08, 0x36, 0x41, 0x00], // '{'
    [0x00, 0x00, 0x7f, 0x00, 0x00], // '|'
    [0x00, 0x41, 0x36, 0x08, 0x00], // '}'
    [0x08, 0x08, 0x2a, 0x1c, 0x08], // '~'
];
