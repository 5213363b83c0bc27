//! The canonical model input transform: resize, center-crop, normalize.

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::PredictionError;

pub const INPUT_SIZE: u32 = 224;

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Memory layout a graph expects for its image input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

/// A normalized `[1, size, size, 3]` batch of one image, stored NHWC.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: Vec<f32>,
    size: u32,
}

impl InputTensor {
    pub fn zeros(size: u32) -> Self {
        Self {
            data: vec![0.0; (size * size * 3) as usize],
            size,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn dims(&self, layout: TensorLayout) -> [u64; 4] {
        let size = self.size as u64;
        match layout {
            TensorLayout::Nhwc => [1, size, size, 3],
            TensorLayout::Nchw => [1, 3, size, size],
        }
    }

    pub fn nhwc(&self) -> &[f32] {
        &self.data
    }

    pub fn to_layout(&self, layout: TensorLayout) -> Vec<f32> {
        match layout {
            TensorLayout::Nhwc => self.data.clone(),
            TensorLayout::Nchw => {
                let plane = (self.size * self.size) as usize;
                let mut out = vec![0.0; self.data.len()];
                for (i, pixel) in self.data.chunks_exact(3).enumerate() {
                    out[i] = pixel[0];
                    out[plane + i] = pixel[1];
                    out[2 * plane + i] = pixel[2];
                }
                out
            }
        }
    }
}

/// Resizes so the shorter side equals `target_size`, keeping the aspect ratio.
fn resize_shorter_side(image: &RgbImage, target_size: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let scale = target_size as f64 / width.min(height) as f64;
    let new_width = ((width as f64 * scale).round() as u32).max(target_size);
    let new_height = ((height as f64 * scale).round() as u32).max(target_size);

    imageops::resize(image, new_width, new_height, FilterType::Triangle)
}

fn center_crop(image: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let x_offset = width.saturating_sub(size) / 2;
    let y_offset = height.saturating_sub(size) / 2;

    imageops::crop_imm(image, x_offset, y_offset, size, size).to_image()
}

fn normalize(image: &RgbImage) -> InputTensor {
    let mut data = Vec::with_capacity((image.width() * image.height() * 3) as usize);
    for pixel in image.pixels() {
        for channel in 0..3 {
            let value = pixel[channel] as f32 / 255.0;
            data.push((value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]);
        }
    }

    InputTensor {
        data,
        size: image.width(),
    }
}

pub fn canonical(image: &RgbImage) -> Result<InputTensor, PredictionError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PredictionError::Transform(format!(
            "cannot transform a {}x{} image",
            width, height
        )));
    }

    let resized = resize_shorter_side(image, INPUT_SIZE);
    let cropped = center_crop(&resized, INPUT_SIZE);
    Ok(normalize(&cropped))
}
