//! Image preprocessing for the flower classifier
//!
//! Turns a decoded bitmap into the `[1, H, W, 3]` float batch the model was
//! trained on: nearest-neighbour resize, cast, scale to `[0, 1]`, batch axis.

use std::path::Path;

use image::{DynamicImage, RgbImage};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tensor::{Tensor, TensorError, TensorLedger};
use crate::error::{Error, Result};
use crate::utils::image::{decode_image, read_image};

/// Divisor mapping 8-bit pixel values onto `[0, 1]`
pub const PIXEL_SCALE: f32 = 255.0;

/// Model input geometry, without the batch axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl InputShape {
    /// `[1, H, W, C]`
    pub fn batched(&self) -> [usize; 4] {
        [1, self.height, self.width, self.channels]
    }
}

impl Default for InputShape {
    fn default() -> Self {
        Self {
            height: 180,
            width: 180,
            channels: 3,
        }
    }
}

/// Decoded RGB bitmap handed in by the caller
///
/// Alpha and grayscale sources are flattened to three channels on
/// construction, so the preprocessor only ever sees RGB.
#[derive(Debug, Clone)]
pub struct RawImage {
    pixels: RgbImage,
}

impl RawImage {
    /// Decode encoded bytes, honouring EXIF orientation
    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        Ok(Self::from_dynamic(&decode_image(data)?))
    }

    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::from_dynamic(&read_image(path)?))
    }

    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self {
            pixels: image.to_rgb8(),
        }
    }

    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// True when there are no pixels to classify
    pub fn is_empty(&self) -> bool {
        self.pixels.width() == 0 || self.pixels.height() == 0
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }
}

/// Fixed preprocessing pipeline bound to one ledger and input shape
#[derive(Debug, Clone)]
pub struct Preprocessor {
    ledger: TensorLedger,
    shape: InputShape,
}

impl Preprocessor {
    pub fn new(ledger: TensorLedger, shape: InputShape) -> Self {
        Self { ledger, shape }
    }

    pub fn shape(&self) -> InputShape {
        self.shape
    }

    /// Build the model input tensor for `image`
    ///
    /// Only the returned tensor survives. Each intermediate is dropped as
    /// soon as the next stage has produced its output, and any stage failure
    /// drops everything allocated so far before the error propagates.
    pub fn prepare(&self, image: &RawImage) -> Result<Tensor<f32>> {
        if image.is_empty() {
            return Err(Error::NoInput);
        }

        let pixels = self.pixel_tensor(image).map_err(Error::preprocess("decode"))?;
        debug!(shape = ?pixels.shape(), "Decoded pixel tensor");

        let resized = pixels
            .resize_nearest(self.shape.height, self.shape.width)
            .map_err(Error::preprocess("resize"))?;
        drop(pixels);

        let floats = resized.cast_f32().map_err(Error::preprocess("cast"))?;
        drop(resized);

        let normalized = floats
            .div_scalar(PIXEL_SCALE)
            .map_err(Error::preprocess("normalize"))?;
        drop(floats);

        let batched = normalized
            .expand_dims(0)
            .map_err(Error::preprocess("batch"))?;
        drop(normalized);

        debug!(shape = ?batched.shape(), "Input tensor ready");
        Ok(batched)
    }

    /// `[H0, W0, 3]` u8 tensor copied out of the bitmap
    fn pixel_tensor(&self, image: &RawImage) -> std::result::Result<Tensor<u8>, TensorError> {
        let rgb = image.as_rgb();
        let (w, h) = rgb.dimensions();
        let data = Array3::from_shape_vec((h as usize, w as usize, 3), rgb.as_raw().clone())?;
        self.ledger.adopt(data.into_dyn())
    }
}
