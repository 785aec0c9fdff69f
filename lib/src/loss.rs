//! Content and style losses over the activations of a `FeatureExtractor`.
//!
//! Targets are computed once, when the `LossContext` is created, and every
//! evaluation afterwards only runs the synthetic image through the network.
//! Gradients with respect to the image come from differentiating the loss
//! through the extractor with an autodiff backend.

use crate::{
    gram::{feature_map_size, gram_matrix},
    Activations, Dims, Error, FeatureExtractor,
};
use burn::tensor::{
    backend::{AutodiffBackend, Backend},
    ElementConversion, Tensor,
};

/// Multipliers of the content and style terms in a combined objective
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Weights {
    pub alpha: f64,
    pub beta: f64,
}

impl Weights {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1000.0,
        }
    }
}

/// Which loss an image is optimized against
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Objective {
    Content,
    Style,
    Combined(Weights),
}

impl Objective {
    /// Prefix used when naming outputs of a run with this objective
    pub fn label(&self) -> &'static str {
        match self {
            Self::Content => "content_only",
            Self::Style => "style_only",
            Self::Combined(_) => "combined",
        }
    }

    fn uses_content(&self) -> bool {
        !matches!(self, Self::Style)
    }

    fn uses_style(&self) -> bool {
        !matches!(self, Self::Content)
    }
}

/// The value of an objective for one image
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LossTerms {
    /// Content loss, if the objective includes it
    pub content: Option<f64>,
    /// Style loss, if the objective includes it
    pub style: Option<f64>,
    /// The objective value, `alpha * content + beta * style` when combined
    pub total: f64,
}

/// The loss of an image along with its gradient with respect to the image
pub struct Evaluation<B: Backend> {
    pub terms: LossTerms,
    pub gradient: Tensor<B, 4>,
}

/// Fixed targets of a content/style transfer, computed once from the
/// reference images.
pub struct LossContext<B: Backend> {
    dims: Dims,
    content_targets: Vec<(String, Tensor<B, 4>)>,
    style_targets: Vec<(String, Tensor<B, 2>)>,
}

impl<B: Backend> LossContext<B> {
    /// Runs the reference images through the extractor, keeping the content
    /// activations and the Gram matrices of the style activations.
    ///
    /// Both images must be `[1, height, width, 3]` tensors in the extractor's
    /// color order; the content image defines the expected image shape.
    pub fn new<E: FeatureExtractor<B>>(
        extractor: &E,
        content: Tensor<B, 4>,
        style: Tensor<B, 4>,
        content_layers: &[String],
        style_layers: &[String],
    ) -> Result<Self, Error> {
        if content_layers.is_empty() {
            return Err(Error::NoLayers("content"));
        }

        if style_layers.is_empty() {
            return Err(Error::NoLayers("style"));
        }

        let [batch, height, width, channels] = content.dims();
        if batch != 1 || channels != 3 {
            return Err(Error::shape(
                &[1, height, width, 3],
                &[batch, height, width, channels],
            ));
        }
        let dims = Dims::new(width as u32, height as u32);
        let style = coerce_image(dims, style)?;

        let acts = extractor.extract(content, content_layers)?;
        let content_targets = content_layers
            .iter()
            .map(|layer| Ok((layer.clone(), acts.get(layer)?.clone().detach())))
            .collect::<Result<Vec<_>, Error>>()?;

        let acts = extractor.extract(style, style_layers)?;
        let style_targets = style_layers
            .iter()
            .map(|layer| {
                let gram = gram_matrix(acts.get(layer)?.clone())?;
                Ok((layer.clone(), gram.detach()))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self {
            dims,
            content_targets,
            style_targets,
        })
    }

    /// The shape every evaluated image must have
    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn content_layers(&self) -> impl Iterator<Item = &str> {
        self.content_targets.iter().map(|(l, _)| l.as_str())
    }

    pub fn style_layers(&self) -> impl Iterator<Item = &str> {
        self.style_targets.iter().map(|(l, _)| l.as_str())
    }

    /// The target Gram matrix of a style layer
    pub fn target_gram(&self, layer: &str) -> Option<&Tensor<B, 2>> {
        self.style_targets
            .iter()
            .find(|(l, _)| l == layer)
            .map(|(_, g)| g)
    }

    /// The layers that must be extracted to evaluate `objective`
    pub fn layers(&self, objective: Objective) -> Vec<String> {
        let mut layers: Vec<String> = Vec::new();

        let content = self.content_layers().filter(|_| objective.uses_content());
        let style = self.style_layers().filter(|_| objective.uses_style());

        for layer in content.chain(style) {
            if !layers.iter().any(|l| l == layer) {
                layers.push(layer.to_owned());
            }
        }

        layers
    }
}

/// Makes sure `image` is `[1, height, width, 3]`. An image holding the right
/// number of values in a different shape is reshaped.
pub fn coerce_image<B: Backend>(dims: Dims, image: Tensor<B, 4>) -> Result<Tensor<B, 4>, Error> {
    let expected = dims.image_shape();
    let actual = image.dims();

    if actual == expected {
        return Ok(image);
    }

    if actual.iter().product::<usize>() == expected.iter().product::<usize>() {
        log::debug!("reshaping image from {:?} to {:?}", actual, expected);
        return Ok(image.reshape(expected));
    }

    Err(Error::shape(&expected, &actual))
}

/// `mean(0.5 * (F - P)^2)` per content layer, averaged over the layers.
pub fn content_loss<B: Backend>(
    context: &LossContext<B>,
    activations: &Activations<B>,
) -> Result<Tensor<B, 1>, Error> {
    let mut losses = Vec::with_capacity(context.content_targets.len());

    for (layer, target) in &context.content_targets {
        let features = activations.get(layer)?;
        if features.dims() != target.dims() {
            return Err(Error::shape(&target.dims(), &features.dims()));
        }

        let diff = features.clone().sub(target.clone());
        losses.push(diff.clone().mul(diff).mul_scalar(0.5).mean());
    }

    Ok(Tensor::cat(losses, 0).mean())
}

/// `sum((G - A)^2) / (4 * N^2 * M^2)` per style layer, averaged over the
/// layers, where `G` and `A` are the current and target Gram matrices, `N` the
/// layer's channel count and `M` its feature map size.
pub fn style_loss<B: Backend>(
    context: &LossContext<B>,
    activations: &Activations<B>,
) -> Result<Tensor<B, 1>, Error> {
    let mut losses = Vec::with_capacity(context.style_targets.len());

    for (layer, target) in &context.style_targets {
        let features = activations.get(layer)?;
        let map_size = feature_map_size(features.dims()) as f64;

        let gram = gram_matrix(features.clone())?;
        if gram.dims() != target.dims() {
            return Err(Error::shape(&target.dims(), &gram.dims()));
        }

        // mean() already divides by N^2
        let diff = gram.sub(target.clone());
        losses.push(
            diff.clone()
                .mul(diff)
                .mean()
                .div_scalar(4.0 * map_size * map_size),
        );
    }

    Ok(Tensor::cat(losses, 0).mean())
}

struct LossTensors<B: Backend> {
    content: Option<Tensor<B, 1>>,
    style: Option<Tensor<B, 1>>,
}

impl<B: Backend> LossTensors<B> {
    fn compute<E: FeatureExtractor<B>>(
        extractor: &E,
        context: &LossContext<B>,
        objective: Objective,
        image: Tensor<B, 4>,
    ) -> Result<Self, Error> {
        let activations = extractor.extract(image, &context.layers(objective))?;

        let content = if objective.uses_content() {
            Some(content_loss(context, &activations)?)
        } else {
            None
        };

        let style = if objective.uses_style() {
            Some(style_loss(context, &activations)?)
        } else {
            None
        };

        Ok(Self { content, style })
    }

    fn terms(&self, objective: Objective) -> LossTerms {
        let content = self.content.clone().map(scalar);
        let style = self.style.clone().map(scalar);

        let total = match objective {
            Objective::Content => content.unwrap_or_default(),
            Objective::Style => style.unwrap_or_default(),
            Objective::Combined(w) => {
                w.alpha * content.unwrap_or_default() + w.beta * style.unwrap_or_default()
            }
        };

        LossTerms {
            content,
            style,
            total,
        }
    }

    fn total(self, objective: Objective) -> Option<Tensor<B, 1>> {
        match (objective, self.content, self.style) {
            (Objective::Content, Some(c), _) => Some(c),
            (Objective::Style, _, Some(s)) => Some(s),
            (Objective::Combined(w), Some(c), Some(s)) => {
                Some(c.mul_scalar(w.alpha).add(s.mul_scalar(w.beta)))
            }
            _ => None,
        }
    }
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> f64 {
    t.into_scalar().elem::<f64>()
}

/// Evaluates `objective` for `image` without computing a gradient.
pub fn evaluate<B: Backend, E: FeatureExtractor<B>>(
    extractor: &E,
    context: &LossContext<B>,
    objective: Objective,
    image: Tensor<B, 4>,
) -> Result<LossTerms, Error> {
    let image = coerce_image(context.dims, image)?;
    let terms = LossTensors::compute(extractor, context, objective, image)?.terms(objective);

    log::debug!("{} loss: {:?}", objective.label(), terms);
    Ok(terms)
}

/// Evaluates `objective` for `image` and differentiates it with respect to
/// the image.
///
/// The image lives on the inner backend of `B`, as does the returned gradient,
/// so callers never hold on to an autodiff graph between evaluations.
pub fn evaluate_gradient<B: AutodiffBackend, E: FeatureExtractor<B>>(
    extractor: &E,
    context: &LossContext<B>,
    objective: Objective,
    image: Tensor<B::InnerBackend, 4>,
) -> Result<Evaluation<B::InnerBackend>, Error> {
    let image = Tensor::<B, 4>::from_inner(coerce_image(context.dims, image)?).require_grad();

    let tensors = LossTensors::compute(extractor, context, objective, image.clone())?;
    let terms = tensors.terms(objective);
    let total = tensors.total(objective).ok_or(Error::MissingGradient)?;

    let grads = total.backward();
    let gradient = image.grad(&grads).ok_or(Error::MissingGradient)?;

    log::debug!("{} loss: {:?}", objective.label(), terms);
    Ok(Evaluation { terms, gradient })
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::{utils::tensor_values, ColorOrder, Vgg, VggConfig};
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::TensorData,
    };

    type B = Autodiff<NdArray>;
    type Inner = NdArray;

    /// An extractor whose single layer, `pixels`, is the image itself
    pub(crate) struct Pixels;

    impl<K: Backend> FeatureExtractor<K> for Pixels {
        fn color_order(&self) -> ColorOrder {
            ColorOrder::Rgb
        }

        fn layer_names(&self) -> Vec<String> {
            vec!["pixels".to_owned()]
        }

        fn extract(
            &self,
            image: Tensor<K, 4>,
            layers: &[String],
        ) -> Result<Activations<K>, Error> {
            let mut acts = Activations::new();
            for layer in layers {
                if layer != "pixels" {
                    return Err(Error::UnknownLayer(layer.clone()));
                }
                acts.insert(layer.clone(), image.clone());
            }
            Ok(acts)
        }
    }

    pub(crate) fn pattern<K: Backend>(dims: Dims, phase: f32) -> Tensor<K, 4> {
        let len = dims.image_shape().iter().product::<usize>();
        let values: Vec<f32> = (0..len)
            .map(|i| 0.5 + 0.4 * (i as f32 * 0.61 + phase).sin())
            .collect();
        Tensor::from_data(TensorData::new(values, dims.image_shape()), &Default::default())
    }

    fn layers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn pixel_context(dims: Dims) -> LossContext<B> {
        LossContext::new(
            &Pixels,
            pattern(dims, 0.0),
            pattern(dims, 2.0),
            &layers(&["pixels"]),
            &layers(&["pixels"]),
        )
        .unwrap()
    }

    fn vgg_context(vgg: &Vgg<B>, dims: Dims) -> LossContext<B> {
        LossContext::new(
            vgg,
            pattern(dims, 0.0),
            pattern(dims, 2.0),
            &layers(&["conv2_1"]),
            &layers(&["conv1_1", "conv2_1"]),
        )
        .unwrap()
    }

    #[test]
    fn content_loss_vanishes_on_content_image() {
        let dims = Dims::square(6);
        let vgg = Vgg::<B>::new(VggConfig::new(vec![(4, 1), (8, 1)]), &Default::default());
        let ctx = vgg_context(&vgg, dims);

        let terms = evaluate(&vgg, &ctx, Objective::Content, pattern(dims, 0.0)).unwrap();
        assert!(terms.total.abs() < 1e-12, "loss was {}", terms.total);
        assert_eq!(terms.style, None);

        let other = evaluate(&vgg, &ctx, Objective::Content, pattern(dims, 1.0)).unwrap();
        assert!(other.total > 0.0);
    }

    #[test]
    fn style_loss_vanishes_on_style_image() {
        let dims = Dims::square(6);
        let vgg = Vgg::<B>::new(VggConfig::new(vec![(4, 1), (8, 1)]), &Default::default());
        let ctx = vgg_context(&vgg, dims);

        let terms = evaluate(&vgg, &ctx, Objective::Style, pattern(dims, 2.0)).unwrap();
        assert!(terms.total.abs() < 1e-12, "loss was {}", terms.total);
        assert_eq!(terms.content, None);
    }

    #[test]
    fn combined_loss_is_linear() {
        let dims = Dims::square(6);
        let vgg = Vgg::<B>::new(VggConfig::new(vec![(4, 1), (8, 1)]), &Default::default());
        let ctx = vgg_context(&vgg, dims);
        let image = pattern::<B>(dims, 0.7);

        let content = evaluate(&vgg, &ctx, Objective::Content, image.clone()).unwrap();
        let style = evaluate(&vgg, &ctx, Objective::Style, image.clone()).unwrap();

        for &(alpha, beta) in &[(1.0, 1.0), (0.0, 3.0), (2.5, 0.0), (1e-3, 1e4)] {
            let w = Weights::new(alpha, beta);
            let combined = evaluate(&vgg, &ctx, Objective::Combined(w), image.clone()).unwrap();

            assert_eq!(combined.content, Some(content.total));
            assert_eq!(combined.style, Some(style.total));
            assert_eq!(combined.total, alpha * content.total + beta * style.total);
        }
    }

    #[test]
    fn content_gradient_matches_analytic() {
        let dims = Dims::new(3, 2);
        let ctx = pixel_context(dims);
        let image = pattern::<Inner>(dims, 1.3);

        let eval = evaluate_gradient(&Pixels, &ctx, Objective::Content, image.clone()).unwrap();
        assert_eq!(eval.gradient.dims(), [1, 2, 3, 3]);

        // d/dI mean(0.5 * (I - T)^2) = (I - T) / n
        let n = 18.0;
        let got = tensor_values(eval.gradient).unwrap();
        let img = tensor_values(image).unwrap();
        let target = tensor_values(pattern::<Inner>(dims, 0.0)).unwrap();

        for i in 0..got.len() {
            let expected = (img[i] - target[i]) / n;
            assert!((got[i] - expected).abs() < 1e-6, "{} != {}", got[i], expected);
        }
    }

    #[test]
    fn stepping_against_style_gradient_lowers_loss() {
        let dims = Dims::new(3, 2);
        let ctx = pixel_context(dims);
        let image = pattern::<Inner>(dims, 0.4);

        let eval = evaluate_gradient(&Pixels, &ctx, Objective::Style, image.clone()).unwrap();
        let stepped = image.sub(eval.gradient.mul_scalar(0.5));
        let after = evaluate(&Pixels, &ctx, Objective::Style, Tensor::from_inner(stepped)).unwrap();

        assert!(after.total < eval.terms.total);
    }

    #[test]
    fn evaluation_coerces_or_rejects_shapes() {
        let dims = Dims::new(3, 2);
        let ctx = pixel_context(dims);
        let device = Default::default();

        let transposed = Tensor::<B, 4>::ones([1, 3, 2, 3], &device);
        assert!(evaluate(&Pixels, &ctx, Objective::Content, transposed).is_ok());

        let wrong = Tensor::<B, 4>::ones([1, 3, 3, 3], &device);
        assert!(matches!(
            evaluate(&Pixels, &ctx, Objective::Content, wrong),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn layers_are_required() {
        let dims = Dims::square(2);
        let res = LossContext::<B>::new(
            &Pixels,
            pattern(dims, 0.0),
            pattern(dims, 1.0),
            &[],
            &layers(&["pixels"]),
        );
        assert!(matches!(res, Err(Error::NoLayers("content"))));
    }

    #[test]
    fn required_layers_are_deduplicated() {
        let dims = Dims::square(6);
        let vgg = Vgg::<B>::new(VggConfig::new(vec![(4, 1), (8, 1)]), &Default::default());
        let ctx = vgg_context(&vgg, dims);

        assert_eq!(ctx.layers(Objective::Content), layers(&["conv2_1"]));
        assert_eq!(ctx.layers(Objective::Style), layers(&["conv1_1", "conv2_1"]));
        assert_eq!(
            ctx.layers(Objective::Combined(Weights::default())),
            layers(&["conv2_1", "conv1_1"])
        );
        assert_eq!(ctx.target_gram("conv1_1").unwrap().dims(), [4, 4]);
    }
}
