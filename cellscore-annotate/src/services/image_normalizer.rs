//! Image normalization to the classifier's fixed input size
//!
//! Each channel is processed as its own `f32` plane in [0, 1]:
//! - [`ResizePolicy::PadCenter`]: pad, no scaling
//! - [`ResizePolicy::ScaleThenPad`]: scale towards 224 keeping aspect ratio, then pad
//! - [`ResizePolicy::ForceResize`]: scale both sides to 224
//!
//! and every policy ends with a center crop to 224x224.

use crate::error::{AnnotateError, AnnotateResult};
use crate::models::IndexedImage;
use cellscore_common::config::ResizePolicy;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Luma};

/// Side length of every normalized image
pub const TARGET_SIZE: u32 = 224;

type Plane = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Planar (CHW) 224x224 image
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    channels: usize,
    data: Vec<f32>,
}

impl NormalizedImage {
    /// Wrap planar data; None unless `data` holds exactly `channels` planes
    pub fn new(channels: usize, data: Vec<f32>) -> Option<Self> {
        let plane = (TARGET_SIZE * TARGET_SIZE) as usize;
        (channels > 0 && data.len() == channels * plane).then_some(Self { channels, data })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn width(&self) -> u32 {
        TARGET_SIZE
    }

    pub fn height(&self) -> u32 {
        TARGET_SIZE
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn pixel(&self, channel: usize, x: u32, y: u32) -> Option<f32> {
        if x >= TARGET_SIZE || y >= TARGET_SIZE {
            return None;
        }
        let plane = (TARGET_SIZE * TARGET_SIZE) as usize;
        let offset = (y * TARGET_SIZE + x) as usize;
        self.data.get(channel * plane + offset).copied()
    }
}

/// Normalized image with its label tensor
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: NormalizedImage,
    /// Shape (1,); None for unlabeled images
    pub label: Option<[f32; 1]>,
}

pub struct ImageNormalizer {
    policy: ResizePolicy,
}

impl ImageNormalizer {
    pub fn new(policy: ResizePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ResizePolicy {
        self.policy
    }

    /// Decode and normalize one indexed image
    pub fn load(&self, image: &IndexedImage) -> AnnotateResult<Sample> {
        let decoded =
            image::open(&image.path).map_err(|e| AnnotateError::Image(image.path.clone(), e))?;
        Ok(Sample {
            image: self.normalize(&decoded),
            label: image.label.as_tensor(),
        })
    }

    pub fn normalize(&self, image: &DynamicImage) -> NormalizedImage {
        let planes = split_planes(image);
        let channels = planes.len();
        let mut data = Vec::with_capacity(channels * (TARGET_SIZE * TARGET_SIZE) as usize);
        for plane in planes {
            data.extend_from_slice(self.normalize_plane(plane).as_raw());
        }
        NormalizedImage { channels, data }
    }

    fn normalize_plane(&self, plane: Plane) -> Plane {
        let plane = match self.policy {
            ResizePolicy::PadCenter => pad_for_crop(plane),
            ResizePolicy::ScaleThenPad => {
                let (width, height) = scaled_size(plane.width(), plane.height());
                pad_for_crop(imageops::resize(&plane, width, height, FilterType::Triangle))
            }
            ResizePolicy::ForceResize => {
                imageops::resize(&plane, TARGET_SIZE, TARGET_SIZE, FilterType::Triangle)
            }
        };
        center_crop(&plane, TARGET_SIZE)
    }
}

/// One plane per channel; alpha is dropped
fn split_planes(image: &DynamicImage) -> Vec<Plane> {
    if !image.color().has_color() {
        return vec![image.to_luma32f()];
    }
    let rgb = image.to_rgb32f();
    (0..3)
        .map(|c| Plane::from_fn(rgb.width(), rgb.height(), |x, y| Luma([rgb.get_pixel(x, y)[c]])))
        .collect()
}

/// Padding per side: `floor((224 - d) / 2) + 1`, zero once `d` exceeds 224
fn pad_amount(dim: u32) -> u32 {
    if dim <= TARGET_SIZE {
        (TARGET_SIZE - dim) / 2 + 1
    } else {
        0
    }
}

fn pad_for_crop(plane: Plane) -> Plane {
    let pad_x = pad_amount(plane.width());
    let pad_y = pad_amount(plane.height());
    if pad_x == 0 && pad_y == 0 {
        return plane;
    }
    let mut padded = Plane::new(plane.width() + 2 * pad_x, plane.height() + 2 * pad_y);
    imageops::replace(&mut padded, &plane, i64::from(pad_x), i64::from(pad_y));
    padded
}

/// Size for scale-then-pad
///
/// Square images go straight to 224. Otherwise the shorter side becomes 223
/// unless that pushes the longer side past 224, in which case the longer side
/// is capped at 224 and the shorter side follows the aspect ratio.
fn scaled_size(width: u32, height: u32) -> (u32, u32) {
    if width == height {
        return (TARGET_SIZE, TARGET_SIZE);
    }
    let short = u64::from(width.min(height).max(1));
    let long = u64::from(width.max(height));

    let mut new_short = u64::from(TARGET_SIZE - 1);
    let mut new_long = new_short * long / short;
    if new_long > u64::from(TARGET_SIZE) {
        new_short = u64::from(TARGET_SIZE) * new_short / new_long;
        new_long = u64::from(TARGET_SIZE);
    }
    let new_short = new_short.max(1) as u32;
    let new_long = new_long as u32;

    if width < height {
        (new_short, new_long)
    } else {
        (new_long, new_short)
    }
}

/// Offset of the crop window; negative when the plane is smaller than the crop
fn crop_offset(dim: u32, size: u32) -> i64 {
    if dim >= size {
        (f64::from(dim - size) / 2.0).round_ties_even() as i64
    } else {
        -i64::from((size - dim) / 2)
    }
}

fn center_crop(plane: &Plane, size: u32) -> Plane {
    let left = crop_offset(plane.width(), size);
    let top = crop_offset(plane.height(), size);
    Plane::from_fn(size, size, |x, y| {
        let sx = i64::from(x) + left;
        let sy = i64::from(y) + top;
        let inside = sx >= 0
            && sy >= 0
            && sx < i64::from(plane.width())
            && sy < i64::from(plane.height());
        if inside {
            *plane.get_pixel(sx as u32, sy as u32)
        } else {
            Luma([0.0])
        }
    })
}
