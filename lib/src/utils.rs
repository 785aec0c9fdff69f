use crate::{ColorOrder, Dims, Error};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Helper type used to define the source of `ImageSource`'s data
#[derive(Clone)]
pub enum ImageSource<'a> {
    /// A raw buffer of image data, see `image::load_from_memory` for details
    /// on what is supported
    Memory(&'a [u8]),
    /// The path to an image to load from disk. The image format is inferred
    /// from the file extension, see `image::open` for details
    Path(&'a Path),
    /// An already loaded image that is passed directly to the session
    Image(image::DynamicImage),
}

impl<'a> From<image::DynamicImage> for ImageSource<'a> {
    fn from(img: image::DynamicImage) -> Self {
        Self::Image(img)
    }
}

impl<'a, S> From<&'a S> for ImageSource<'a>
where
    S: AsRef<Path> + 'a,
{
    fn from(path: &'a S) -> Self {
        Self::Path(path.as_ref())
    }
}

pub fn load_dynamic_image(src: ImageSource<'_>) -> Result<image::DynamicImage, image::ImageError> {
    match src {
        ImageSource::Memory(data) => image::load_from_memory(data),
        ImageSource::Path(path) => image::open(path),
        ImageSource::Image(img) => Ok(img),
    }
}

pub(crate) fn load_image(
    src: ImageSource<'_>,
    resize: Option<Dims>,
) -> Result<image::RgbImage, Error> {
    let img = load_dynamic_image(src)?;

    let img = match resize {
        None => img.to_rgb(),
        Some(ref size) => {
            use image::GenericImageView;

            if img.width() != size.width || img.height() != size.height {
                image::imageops::resize(
                    &img.to_rgb(),
                    size.width,
                    size.height,
                    image::imageops::CatmullRom,
                )
            } else {
                img.to_rgb()
            }
        }
    };

    Ok(img)
}

/// Converts an RGB image into a `[1, height, width, 3]` tensor with values in
/// `[0, 1]`, laid out in the requested channel order.
pub fn image_to_tensor<B: Backend>(
    img: &image::RgbImage,
    order: ColorOrder,
    device: &B::Device,
) -> Tensor<B, 4> {
    let (width, height) = img.dimensions();
    let mut pixels: Vec<f32> = img.as_raw().iter().map(|v| f32::from(*v) / 255.0).collect();
    order.reorder_rgb(&mut pixels);

    Tensor::from_data(
        TensorData::new(pixels, [1, height as usize, width as usize, 3]),
        device,
    )
}

/// Reads an image tensor back into RGB order. Values are not clipped.
pub fn tensor_to_pixels<B: Backend>(
    tensor: Tensor<B, 4>,
    order: ColorOrder,
) -> Result<Vec<f32>, Error> {
    let dims = tensor.dims();
    if dims[0] != 1 || dims[3] != 3 {
        return Err(Error::shape(&[1, dims[1], dims[2], 3], &dims));
    }

    let mut pixels = tensor_values(tensor)?;
    order.restore_rgb(&mut pixels);
    Ok(pixels)
}

/// Quantizes RGB values in `[0, 1]` into an 8-bit image, clipping anything
/// outside of that range.
pub fn pixels_to_image(pixels: &[f32], dims: Dims) -> image::RgbImage {
    let raw = pixels
        .iter()
        .map(|v| {
            // NaN also ends up as 0
            let v = if v.is_nan() { 0.0 } else { v.max(0.0).min(1.0) };
            (v * 255.0).round() as u8
        })
        .collect();

    image::RgbImage::from_raw(dims.width, dims.height, raw)
        .unwrap_or_else(|| image::RgbImage::new(dims.width, dims.height))
}

/// Flattens a tensor into a vector of doubles, the parameter form used by
/// optimizers that work on flat vectors.
pub fn flatten<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f64>, Error> {
    Ok(tensor_values(tensor)?
        .into_iter()
        .map(f64::from)
        .collect())
}

/// Reshapes a flat parameter vector back into a `[1, height, width, 3]`
/// image tensor.
pub fn unflatten<B: Backend>(
    values: &[f64],
    dims: Dims,
    device: &B::Device,
) -> Result<Tensor<B, 4>, Error> {
    let shape = dims.image_shape();
    let len = shape.iter().product::<usize>();
    if values.len() != len {
        return Err(Error::shape(&[len], &[values.len()]));
    }

    let values: Vec<f32> = values.iter().map(|v| *v as f32).collect();
    Ok(Tensor::from_data(TensorData::new(values, shape), device))
}

pub(crate) fn tensor_values<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<Vec<f32>, Error> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::Tensor(format!("{:?}", err)))
}

/// Grayscale white noise in `[0, 1)`, the same value repeated across the 3
/// channels of each pixel.
pub(crate) fn white_noise(dims: Dims, seed: u64) -> Vec<f32> {
    let mut rng = rand_pcg::Pcg32::seed_from_u64(seed);
    let count = dims.width as usize * dims.height as usize;

    let mut pixels = Vec::with_capacity(count * 3);
    for _ in 0..count {
        let v: f32 = rng.gen();
        pixels.extend_from_slice(&[v, v, v]);
    }

    pixels
}
