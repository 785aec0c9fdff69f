//! The interface to the pretrained network whose activations are used as the
//! representation space for content and style.

use crate::Error;
use burn::tensor::{backend::Backend, Tensor};
use std::collections::HashMap;

/// Channel order of an image tensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorOrder {
    Rgb,
    Bgr,
}

impl ColorOrder {
    /// Reorders interleaved RGB values in place into this order
    pub fn reorder_rgb(self, pixels: &mut [f32]) {
        if self == Self::Bgr {
            swap_red_blue(pixels);
        }
    }

    /// Reorders interleaved values in this order in place into RGB
    pub fn restore_rgb(self, pixels: &mut [f32]) {
        // the swap is its own inverse
        self.reorder_rgb(pixels);
    }
}

fn swap_red_blue(pixels: &mut [f32]) {
    for px in pixels.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

/// A fixed network that exposes its intermediate activations by layer name.
///
/// Images are `[1, height, width, 3]` tensors with values in `[0, 1]`,
/// already in the extractor's `color_order`. Activations are returned in the
/// same channels-last layout, `[1, height_l, width_l, channels_l]`.
pub trait FeatureExtractor<B: Backend> {
    /// The channel order the network expects its input in
    fn color_order(&self) -> ColorOrder;

    /// Every layer name that can be requested from `extract`
    fn layer_names(&self) -> Vec<String>;

    fn has_layer(&self, name: &str) -> bool {
        self.layer_names().iter().any(|l| l == name)
    }

    /// Runs the network on `image` and returns the activations of `layers`.
    fn extract(&self, image: Tensor<B, 4>, layers: &[String]) -> Result<Activations<B>, Error>;
}

/// Activations of a single forward pass, keyed by layer name
pub struct Activations<B: Backend> {
    maps: HashMap<String, Tensor<B, 4>>,
}

impl<B: Backend> Activations<B> {
    pub fn new() -> Self {
        Self {
            maps: HashMap::new(),
        }
    }

    pub fn insert(&mut self, layer: impl Into<String>, features: Tensor<B, 4>) {
        self.maps.insert(layer.into(), features);
    }

    pub fn get(&self, layer: &str) -> Result<&Tensor<B, 4>, Error> {
        self.maps
            .get(layer)
            .ok_or_else(|| Error::UnknownLayer(layer.to_owned()))
    }

    pub fn contains(&self, layer: &str) -> bool {
        self.maps.contains_key(layer)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl<B: Backend> Default for Activations<B> {
    fn default() -> Self {
        Self::new()
    }
}
