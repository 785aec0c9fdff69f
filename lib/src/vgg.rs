//! A VGG style convolutional network used as the feature extractor.
//!
//! Layers follow the usual VGG naming: `convB_I` is the rectified output of
//! the `I`th convolution of block `B`, and `poolB` is the output of the pooling
//! that closes block `B`. Indices start at 1.

use crate::{Activations, ColorOrder, Dims, Error, FeatureExtractor};
use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{
        activation::relu,
        backend::Backend,
        module::{avg_pool2d, max_pool2d},
        Tensor,
    },
};
use std::path::Path;

/// Per channel mean of the ImageNet training set, in BGR order and 0-255 range
pub const IMAGENET_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// How the spatial resolution is halved between blocks
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pooling {
    Max,
    Average,
}

impl Pooling {
    /// 2x2 pooling with a stride of 2 over an NCHW tensor. An odd trailing
    /// row or column is dropped.
    fn apply<B: Backend>(self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Max => max_pool2d(x, [2, 2], [2, 2], [0, 0], [1, 1]),
            Self::Average => avg_pool2d(x, [2, 2], [2, 2], [0, 0], false),
        }
    }
}

/// Topology and input preprocessing of a `Vgg` network
#[derive(Clone, Debug)]
pub struct VggConfig {
    /// `(output channels, convolution count)` of each block
    pub blocks: Vec<(usize, usize)>,
    pub pooling: Pooling,
    /// Inputs in `[0, 1]` are multiplied by this before the mean is removed
    pub scale: f32,
    /// Subtracted from every pixel, in the network's channel order
    pub mean: [f32; 3],
}

impl VggConfig {
    /// A network with the given blocks, expecting 0-255 BGR input with the
    /// ImageNet mean removed
    pub fn new(blocks: Vec<(usize, usize)>) -> Self {
        Self {
            blocks,
            pooling: Pooling::Max,
            scale: 255.0,
            mean: IMAGENET_MEAN_BGR,
        }
    }

    /// The 19 layer configuration, 16 convolutions in 5 blocks
    pub fn vgg19() -> Self {
        Self::new(vec![(64, 2), (128, 2), (256, 4), (512, 4), (512, 4)])
    }

    /// The 16 layer configuration, 13 convolutions in 5 blocks
    pub fn vgg16() -> Self {
        Self::new(vec![(64, 2), (128, 2), (256, 3), (512, 3), (512, 3)])
    }

    pub fn with_pooling(mut self, pooling: Pooling) -> Self {
        self.pooling = pooling;
        self
    }

    fn conv_count(&self) -> usize {
        self.blocks.iter().map(|(_, count)| count).sum()
    }

    /// Every layer name in forward order
    pub fn layer_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (b, (_, count)) in self.blocks.iter().enumerate() {
            for i in 0..*count {
                names.push(format!("conv{}_{}", b + 1, i + 1));
            }
            names.push(format!("pool{}", b + 1));
        }
        names
    }
}

/// The learned parameters of a `Vgg` network, in forward order.
#[derive(Module, Debug)]
pub struct VggWeights<B: Backend> {
    convs: Vec<Conv2d<B>>,
}

impl<B: Backend> VggWeights<B> {
    fn new(config: &VggConfig, device: &B::Device) -> Self {
        let mut convs = Vec::with_capacity(config.conv_count());
        let mut channels_in = 3;

        for (channels_out, count) in config.blocks.iter() {
            for _ in 0..*count {
                convs.push(
                    Conv2dConfig::new([channels_in, *channels_out], [3, 3])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(device),
                );
                channels_in = *channels_out;
            }
        }

        Self { convs }
    }
}

/// A VGG network exposing its intermediate activations
pub struct Vgg<B: Backend> {
    config: VggConfig,
    weights: VggWeights<B>,
    mean: Tensor<B, 4>,
}

impl<B: Backend> Vgg<B> {
    /// Creates a network with randomly initialized weights.
    pub fn new(config: VggConfig, device: &B::Device) -> Self {
        let weights = VggWeights::new(&config, device);
        Self::from_weights(config, weights, device)
    }

    /// Creates a network with pretrained weights, stored as a named
    /// MessagePack record of `VggWeights`.
    pub fn load<P: AsRef<Path>>(
        config: VggConfig,
        path: P,
        device: &B::Device,
    ) -> Result<Self, Error> {
        let path = path.as_ref();
        log::debug!("loading network weights from {}", path.display());

        let weights = VggWeights::new(&config, device)
            .load_file(
                path.to_path_buf(),
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
                device,
            )
            .map_err(|err| Error::Weights(format!("{}: {:?}", path.display(), err)))?;

        if weights.convs.len() != config.conv_count() {
            return Err(Error::Weights(format!(
                "{}: expected {} convolutions, found {}",
                path.display(),
                config.conv_count(),
                weights.convs.len()
            )));
        }

        Ok(Self::from_weights(config, weights, device))
    }

    fn from_weights(config: VggConfig, weights: VggWeights<B>, device: &B::Device) -> Self {
        let mean = Tensor::<B, 1>::from_floats(config.mean, device).reshape([1, 1, 1, 3]);

        Self {
            config,
            // The network is fixed, only the image is ever differentiated
            weights: weights.no_grad(),
            mean,
        }
    }
}

impl<B: Backend> FeatureExtractor<B> for Vgg<B> {
    fn color_order(&self) -> ColorOrder {
        ColorOrder::Bgr
    }

    fn layer_names(&self) -> Vec<String> {
        self.config.layer_names()
    }

    fn extract(&self, image: Tensor<B, 4>, layers: &[String]) -> Result<Activations<B>, Error> {
        if let Some(unknown) = layers.iter().find(|l| !self.has_layer(l)) {
            return Err(Error::UnknownLayer(unknown.clone()));
        }

        let [_, height, width, _] = image.dims();
        let mut activations = Activations::new();

        let wanted = |name: &str| layers.iter().any(|l| l == name);
        let done = |acts: &Activations<B>| layers.iter().all(|l| acts.contains(l));

        if done(&activations) {
            return Ok(activations);
        }

        // NHWC in, NCHW through the convolutions
        let mut x = image
            .mul_scalar(self.config.scale)
            .sub(self.mean.clone())
            .permute([0, 3, 1, 2]);

        let mut convs = self.weights.convs.iter();

        for (b, (_, count)) in self.config.blocks.iter().enumerate() {
            for i in 0..*count {
                let name = format!("conv{}_{}", b + 1, i + 1);
                let conv = convs
                    .next()
                    .ok_or_else(|| Error::UnknownLayer(name.clone()))?;

                x = relu(conv.forward(x));

                if wanted(&name) {
                    activations.insert(name, x.clone().permute([0, 2, 3, 1]));
                    if done(&activations) {
                        return Ok(activations);
                    }
                }
            }

            let name = format!("pool{}", b + 1);
            let [_, _, h, w] = x.dims();
            if h < 2 || w < 2 {
                return Err(Error::LayerUnreachable(
                    name,
                    Dims::new(width as u32, height as u32),
                ));
            }

            x = self.config.pooling.apply(x);

            if wanted(&name) {
                activations.insert(name, x.clone().permute([0, 2, 3, 1]));
                if done(&activations) {
                    return Ok(activations);
                }
            }
        }

        Ok(activations)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::tensor_values;
    use burn::{backend::NdArray, tensor::TensorData};

    type B = NdArray;

    fn tiny() -> Vgg<B> {
        Vgg::new(VggConfig::new(vec![(4, 1), (8, 1)]), &Default::default())
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn vgg19_layer_names() {
        let names = VggConfig::vgg19().layer_names();
        assert_eq!(names.len(), 21);
        assert_eq!(names[0], "conv1_1");
        assert!(names.contains(&"conv4_2".to_owned()));
        assert!(names.contains(&"conv5_4".to_owned()));
        assert_eq!(names[20], "pool5");
    }

    #[test]
    fn activations_are_channels_last() {
        let vgg = tiny();
        let image = Tensor::<B, 4>::ones([1, 4, 6, 3], &Default::default());

        let acts = vgg
            .extract(image, &names(&["conv1_1", "pool1", "conv2_1", "pool2"]))
            .unwrap();

        assert_eq!(acts.len(), 4);
        assert_eq!(acts.get("conv1_1").unwrap().dims(), [1, 4, 6, 4]);
        assert_eq!(acts.get("pool1").unwrap().dims(), [1, 2, 3, 4]);
        assert_eq!(acts.get("conv2_1").unwrap().dims(), [1, 2, 3, 8]);
        assert_eq!(acts.get("pool2").unwrap().dims(), [1, 1, 1, 8]);
    }

    #[test]
    fn unknown_layers_are_rejected() {
        let vgg = tiny();
        let image = Tensor::<B, 4>::ones([1, 4, 4, 3], &Default::default());

        match vgg.extract(image, &names(&["conv3_1"])) {
            Err(Error::UnknownLayer(name)) => assert_eq!(name, "conv3_1"),
            _ => panic!("expected an unknown layer error"),
        }
    }

    #[test]
    fn stops_before_unreachable_layers() {
        let vgg = tiny();
        let device = Default::default();

        let image = Tensor::<B, 4>::ones([1, 1, 1, 3], &device);
        assert!(vgg.extract(image.clone(), &names(&["conv1_1"])).is_ok());

        match vgg.extract(image, &names(&["conv2_1"])) {
            Err(Error::LayerUnreachable(name, dims)) => {
                assert_eq!(name, "pool1");
                assert_eq!(dims, Dims::square(1));
            }
            _ => panic!("expected an unreachable layer error"),
        }
    }

    #[test]
    fn gradients_pass_through_pooling() {
        type A = burn::backend::Autodiff<B>;
        let device = Default::default();

        for pooling in [Pooling::Max, Pooling::Average].iter() {
            let config = VggConfig::new(vec![(4, 1), (8, 1)]).with_pooling(*pooling);
            let vgg = Vgg::<A>::new(config, &device);

            let image = Tensor::<A, 4>::ones([1, 4, 6, 3], &device)
                .mul_scalar(0.5)
                .require_grad();
            let acts = vgg.extract(image.clone(), &names(&["conv2_1"])).unwrap();

            let grads = acts.get("conv2_1").unwrap().clone().sum().backward();
            let grad = image.grad(&grads).expect("no gradient for the image");
            assert_eq!(grad.dims(), [1, 4, 6, 3], "{:?}", pooling);
        }
    }

    #[test]
    fn pooling_halves_resolution() {
        let device = Default::default();
        let x = Tensor::<B, 4>::from_data(
            TensorData::new(
                vec![
                    1.0f32, 2.0, 5.0, 6.0, 9.0, //
                    3.0, 4.0, 7.0, 8.0, 9.0, //
                    9.0, 9.0, 9.0, 9.0, 9.0,
                ],
                [1, 1, 3, 5],
            ),
            &device,
        );

        let max = tensor_values(Pooling::Max.apply(x.clone())).unwrap();
        assert_eq!(max, vec![4.0, 8.0]);

        let avg = tensor_values(Pooling::Average.apply(x)).unwrap();
        assert_eq!(avg, vec![2.5, 6.5]);
    }
}
