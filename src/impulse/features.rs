use image::{
    imageops::{self, FilterType},
    RgbImage,
};

/// Image input the model expects.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct InputShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

/// Model features for one frame plus the way back to frame coordinates.
#[derive(Debug, PartialEq, Clone)]
pub struct PreparedInput {
    pub features: Vec<u32>,
    pub crop: Crop,
}

/// The frame is scaled by `input_dim / frame_dim` and then cropped at the offsets.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Crop {
    offset_x: u32,
    offset_y: u32,
    frame_dim: u32,
    input_dim: u32,
}

impl Crop {
    fn to_frame(self, v: i64) -> u32 {
        (v.max(0) as f64 * self.frame_dim as f64 / self.input_dim as f64).round() as u32
    }

    /// Maps a box reported in model-input pixels to frame pixels. Negative values clamp to 0.
    pub fn map_box(self, x: i64, y: i64, width: i64, height: i64) -> (u32, u32, u32, u32) {
        (
            self.to_frame(x.max(0) + self.offset_x as i64),
            self.to_frame(y.max(0) + self.offset_y as i64),
            self.to_frame(width),
            self.to_frame(height),
        )
    }
}

impl InputShape {
    /// Scales the frame until it covers the input, centre-crops it and packs each
    /// pixel as `0xRRGGBB`. Single channel models get the luma in all three bytes.
    pub fn prepare(&self, frame: &RgbImage) -> PreparedInput {
        let (fw, fh) = frame.dimensions();
        let (w, h) = (self.width, self.height);
        if fw == 0 || fh == 0 {
            return PreparedInput {
                features: vec![0; (w * h) as usize],
                crop: Crop {
                    offset_x: 0,
                    offset_y: 0,
                    frame_dim: 1,
                    input_dim: 1,
                },
            };
        }

        let (rw, rh, frame_dim, input_dim) = if w as u64 * fh as u64 >= h as u64 * fw as u64 {
            (w, div_ceil(fh as u64 * w as u64, fw as u64), fw, w)
        } else {
            (div_ceil(fw as u64 * h as u64, fh as u64), h, fh, h)
        };
        let resized = if (rw, rh) == (fw, fh) {
            frame.clone()
        } else {
            imageops::resize(frame, rw, rh, FilterType::Triangle)
        };
        let (offset_x, offset_y) = ((rw - w) / 2, (rh - h) / 2);
        let cropped = imageops::crop_imm(&resized, offset_x, offset_y, w, h).to_image();

        let features = if self.channels == 1 {
            imageops::grayscale(&cropped)
                .pixels()
                .map(|p| {
                    let v = p.0[0] as u32;
                    (v << 16) | (v << 8) | v
                })
                .collect()
        } else {
            cropped
                .pixels()
                .map(|p| ((p.0[0] as u32) << 16) | ((p.0[1] as u32) << 8) | p.0[2] as u32)
                .collect()
        };

        PreparedInput {
            features,
            crop: Crop {
                offset_x,
                offset_y,
                frame_dim,
                input_dim,
            },
        }
    }
}

fn div_ceil(a: u64, b: u64) -> u32 {
    ((a + b - 1) / b) as u32
}
