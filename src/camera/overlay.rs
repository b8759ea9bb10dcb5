use std::path::PathBuf;

use image::{Rgb, RgbImage};

use super::{
    font::{glyph, GLYPH_HEIGHT, GLYPH_WIDTH},
    Frame,
};
use crate::{config::ConfigLabels, impulse::Detection};

const REFERENCE_COLOR: Rgb<u8> = Rgb([0, 10, 200]);
const TARGET_COLOR: Rgb<u8> = Rgb([15, 250, 0]);
const OTHER_COLOR: Rgb<u8> = Rgb([80, 240, 20]);
const LABEL_COLOR: Rgb<u8> = Rgb([80, 240, 20]);
const LINE_WIDTH: u32 = 2;
// Rows between the bottom edge of a box and the top of its label
const LABEL_GAP: u32 = 2;

/// Writes every processed frame, with its boxes drawn in, to a preview image.
#[derive(Debug, Clone)]
pub struct Overlay {
    path: PathBuf,
}

impl Overlay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn write(
        &self,
        frame: &Frame,
        detections: &[Detection],
        labels: &ConfigLabels,
    ) -> Result<(), image::ImageError> {
        annotate(&frame.image, detections, labels).save(&self.path)
    }
}

pub fn annotate(image: &RgbImage, detections: &[Detection], labels: &ConfigLabels) -> RgbImage {
    let mut annotated = image.clone();
    for d in detections {
        let color = if d.label == labels.reference {
            REFERENCE_COLOR
        } else if d.label == labels.target {
            TARGET_COLOR
        } else {
            OTHER_COLOR
        };
        draw_rect(&mut annotated, d, color);
        let top = d.y.saturating_add(d.height).saturating_add(LABEL_GAP);
        draw_label(&mut annotated, &d.label, d.x, top);
    }
    annotated
}

fn put(image: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>) {
    if x < image.width() && y < image.height() {
        image.put_pixel(x, y, color);
    }
}

fn draw_rect(image: &mut RgbImage, d: &Detection, color: Rgb<u8>) {
    if d.width == 0 || d.height == 0 || image.width() == 0 || image.height() == 0 {
        return;
    }
    // Boxes may reach past u32::MAX after scaling, clip them to the image
    let right = d.x.saturating_add(d.width - 1);
    let bottom = d.y.saturating_add(d.height - 1);
    let (last_x, last_y) = (image.width() - 1, image.height() - 1);
    for t in 0..LINE_WIDTH.min(d.width).min(d.height) {
        for x in d.x..=right.min(last_x) {
            put(image, x, d.y.saturating_add(t), color);
            put(image, x, bottom - t, color);
        }
        for y in d.y..=bottom.min(last_y) {
            put(image, d.x.saturating_add(t), y, color);
            put(image, right - t, y, color);
        }
    }
}

fn draw_label(image: &mut RgbImage, text: &str, left: u32, top: u32) {
    if top >= image.height() {
        return;
    }
    for (i, c) in text.chars().enumerate() {
        let x0 = left.saturating_add((i as u32).saturating_mul(GLYPH_WIDTH + 1));
        if x0 >= image.width() {
            break;
        }
        for (row, bits) in (0..GLYPH_HEIGHT).zip(glyph(c)) {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) != 0 {
                    put(image, x0.saturating_add(col), top.saturating_add(row), LABEL_COLOR);
                }
            }
        }
    }
}
