use crate::{
    loss::{self, Evaluation, LossContext, LossTerms, Objective},
    optimize::{Interrupt, Lbfgs, Minimizer, MomentumDescent, Observer, Problem},
    params::{Algorithm, RunParams},
    utils::{self, flatten, image_to_tensor, load_image, tensor_to_pixels, unflatten},
    ColorOrder, Dims, Error, FeatureExtractor, ImageSource, Stylized,
};
use burn::tensor::{backend::AutodiffBackend, Tensor, TensorData};

type Image<B> = Tensor<<B as AutodiffBackend>::InnerBackend, 4>;

/// Style transfer session.
///
/// A session holds the feature extractor, the targets computed from the style
/// and content images, and the image every run starts from. Runs borrow the
/// session, so the same targets can be reused for several objectives or
/// parameter sets. You can provide a `TransferProgress` implementation to get
/// the current image and loss after every iteration.
///
/// # Example
/// ```no_run
/// use style_transfer::{
///     burn::backend::{Autodiff, NdArray},
///     RunParams, SessionBuilder, Vgg, VggConfig,
/// };
///
/// let device = Default::default();
/// let vgg = Vgg::<Autodiff<NdArray>>::load(VggConfig::vgg19(), "vgg19.mpk", &device)
///     .expect("failed to load network weights");
///
/// let session = SessionBuilder::new()
///     .style(&"imgs/style.jpg")
///     .content(&"imgs/content.jpg")
///     .build(vgg, &device)
///     .expect("failed to build session");
///
/// let stylized = session
///     .transfer(&RunParams::default(), None)
///     .expect("failed to transfer style");
/// stylized.save("out/stylized.jpg").expect("failed to save image");
/// ```
pub struct Session<B: AutodiffBackend, E: FeatureExtractor<B>> {
    extractor: E,
    device: B::Device,
    context: LossContext<B>,
    synthetic: Image<B>,
}

impl<B: AutodiffBackend, E: FeatureExtractor<B>> Session<B, E> {
    /// Optimizes the starting image towards the content image's activations
    pub fn transfer_content(
        &self,
        params: &RunParams,
        progress: Option<Box<dyn TransferProgress>>,
    ) -> Result<Stylized, Error> {
        self.run(Objective::Content, params, progress)
    }

    /// Optimizes the starting image towards the style image's Gram statistics
    pub fn transfer_style(
        &self,
        params: &RunParams,
        progress: Option<Box<dyn TransferProgress>>,
    ) -> Result<Stylized, Error> {
        self.run(Objective::Style, params, progress)
    }

    /// Optimizes the starting image against both targets, weighted by the
    /// `alpha` and `beta` of `params`
    pub fn transfer(
        &self,
        params: &RunParams,
        progress: Option<Box<dyn TransferProgress>>,
    ) -> Result<Stylized, Error> {
        self.run(Objective::Combined(params.weights()), params, progress)
    }

    /// Runs the optimizer selected by `params` on `objective`, starting from
    /// the session's synthetic image.
    ///
    /// When `params.out_dir` is set, the result is saved there as
    /// `<objective>_<name>.jpg` along with a plot of the loss history,
    /// `<objective>_<name>_loss.png`.
    pub fn run(
        &self,
        objective: Objective,
        params: &RunParams,
        progress: Option<Box<dyn TransferProgress>>,
    ) -> Result<Stylized, Error> {
        params.validate()?;

        let dims = self.context.dims();
        let interrupt = Interrupt::new(params.cancel.clone(), params.timeout);
        let mut problem = ImageProblem {
            session: self,
            objective,
        };
        let mut reporter = Reporter {
            label: objective.label(),
            order: self.extractor.color_order(),
            dims,
            total: params.iters,
            progress,
        };

        log::info!(
            "running {} for {} iterations with {}",
            objective.label(),
            params.iters,
            params.algorithm
        );

        let (image, history, termination) = match params.algorithm {
            Algorithm::Sgd => {
                let sgd = MomentumDescent::new(params.step_size, params.gamma, params.iters);
                let out = sgd.minimize(
                    self.synthetic.clone(),
                    &mut problem,
                    &mut reporter,
                    &interrupt,
                )?;
                (out.param, out.history, out.termination)
            }
            Algorithm::Lbfgs => {
                let lbfgs = Lbfgs::new(params.iters).with_history_size(params.history_size);
                let out = lbfgs.minimize(
                    flatten(self.synthetic.clone())?,
                    &mut problem,
                    &mut reporter,
                    &interrupt,
                )?;
                let image = unflatten(&out.param, dims, &self.device)?;
                (image, out.history, out.termination)
            }
        };

        let pixels = tensor_to_pixels(image, self.extractor.color_order())?;
        let stylized = Stylized::new(pixels, dims, history, termination);

        if let Some(out_dir) = &params.out_dir {
            let stem = format!("{}_{}", objective.label(), params.name);

            let img_path = out_dir.join(format!("{}.jpg", stem));
            stylized.save(&img_path)?;

            let plot_path = out_dir.join(format!("{}_loss.png", stem));
            stylized.save_loss_plot(&plot_path)?;

            log::info!(
                "saved {} and {}",
                img_path.display(),
                plot_path.display()
            );
        }

        Ok(stylized)
    }

    /// The loss of `image` under `objective`
    pub fn loss(&self, objective: Objective, image: Image<B>) -> Result<LossTerms, Error> {
        loss::evaluate(
            &self.extractor,
            &self.context,
            objective,
            Tensor::<B, 4>::from_inner(image),
        )
    }

    /// The loss of `image` under `objective` and its gradient with respect to
    /// the image
    pub fn loss_gradient(
        &self,
        objective: Objective,
        image: Image<B>,
    ) -> Result<Evaluation<B::InnerBackend>, Error> {
        loss::evaluate_gradient::<B, E>(&self.extractor, &self.context, objective, image)
    }

    /// Loads an image at the session's dimensions, in the extractor's color
    /// order
    pub fn open_image<'a, I: Into<ImageSource<'a>>>(&self, source: I) -> Result<Image<B>, Error> {
        let img = load_image(source.into(), Some(self.context.dims()))?;
        Ok(image_to_tensor(
            &img,
            self.extractor.color_order(),
            &self.device,
        ))
    }

    /// Replaces the image runs start from
    pub fn set_initial_image<'a, I: Into<ImageSource<'a>>>(
        &mut self,
        source: I,
    ) -> Result<(), Error> {
        self.synthetic = self.open_image(source)?;
        Ok(())
    }

    /// The image runs start from
    pub fn synthetic(&self) -> Image<B> {
        self.synthetic.clone()
    }

    pub fn dims(&self) -> Dims {
        self.context.dims()
    }
}

/// Builds a session by setting the reference images and layers, calling
/// `build` will check all of the provided inputs and compute the targets
/// every run is optimized towards
pub struct SessionBuilder<'a> {
    style: Option<ImageSource<'a>>,
    content: Option<ImageSource<'a>>,
    initial: Option<ImageSource<'a>>,
    dims: Dims,
    content_layers: Vec<String>,
    style_layers: Vec<String>,
    seed: u64,
}

impl<'a> Default for SessionBuilder<'a> {
    fn default() -> Self {
        Self {
            style: None,
            content: None,
            initial: None,
            dims: Dims::square(240),
            content_layers: vec!["conv4_2".to_owned()],
            style_layers: ["conv1_1", "conv2_1", "conv3_1", "conv4_1", "conv5_1"]
                .iter()
                .map(|l| (*l).to_owned())
                .collect(),
            seed: 0,
        }
    }
}

impl<'a> SessionBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The image whose texture statistics are transferred
    pub fn style<I: Into<ImageSource<'a>>>(mut self, style: I) -> Self {
        self.style = Some(style.into());
        self
    }

    /// The image whose structure is kept
    pub fn content<I: Into<ImageSource<'a>>>(mut self, content: I) -> Self {
        self.content = Some(content.into());
        self
    }

    /// The image runs start from.
    ///
    /// Default: grayscale white noise, see `seed`
    pub fn initial<I: Into<ImageSource<'a>>>(mut self, initial: I) -> Self {
        self.initial = Some(initial.into());
        self
    }

    /// Size every image is resized to, and the size of the output.
    ///
    /// Default: 240x240
    pub fn dims(mut self, dims: Dims) -> Self {
        self.dims = dims;
        self
    }

    /// Layers whose activations make up the content representation.
    ///
    /// Default: `conv4_2`
    pub fn content_layers<S: Into<String>, I: IntoIterator<Item = S>>(
        mut self,
        layers: I,
    ) -> Self {
        self.content_layers = layers.into_iter().map(Into::into).collect();
        self
    }

    /// Layers whose Gram matrices make up the style representation.
    ///
    /// Default: `conv1_1`, `conv2_1`, `conv3_1`, `conv4_1`, `conv5_1`
    pub fn style_layers<S: Into<String>, I: IntoIterator<Item = S>>(mut self, layers: I) -> Self {
        self.style_layers = layers.into_iter().map(Into::into).collect();
        self
    }

    /// Seed of the white noise starting image. Has no effect if an
    /// `initial` image is provided.
    ///
    /// Default: 0
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Creates a `Session`, or returns an error if invalid parameters or input
    /// images were specified.
    pub fn build<B, E>(self, extractor: E, device: &B::Device) -> Result<Session<B, E>, Error>
    where
        B: AutodiffBackend,
        E: FeatureExtractor<B>,
    {
        self.check_parameters_validity::<B, E>(&extractor)?;

        let style = self.style.ok_or(Error::MissingImage("style"))?;
        let content = self.content.ok_or(Error::MissingImage("content"))?;

        let order = extractor.color_order();
        let dims = self.dims;

        let content = image_to_tensor::<B>(&load_image(content, Some(dims))?, order, device);
        let style = image_to_tensor::<B>(&load_image(style, Some(dims))?, order, device);

        let context = LossContext::new(
            &extractor,
            content,
            style,
            &self.content_layers,
            &self.style_layers,
        )?;

        let synthetic = match self.initial {
            Some(initial) => image_to_tensor(&load_image(initial, Some(dims))?, order, device),
            None => {
                let mut noise = utils::white_noise(dims, self.seed);
                order.reorder_rgb(&mut noise);
                Tensor::from_data(TensorData::new(noise, dims.image_shape()), device)
            }
        };

        log::debug!(
            "built a {}x{} session, content layers {:?}, style layers {:?}",
            dims.width,
            dims.height,
            self.content_layers,
            self.style_layers
        );

        Ok(Session {
            extractor,
            device: device.clone(),
            context,
            synthetic,
        })
    }

    fn check_parameters_validity<B, E>(&self, extractor: &E) -> Result<(), Error>
    where
        B: AutodiffBackend,
        E: FeatureExtractor<B>,
    {
        if self.dims.width == 0 {
            return Err(Error::range("width", 0.0, 1.0, f64::from(u32::MAX)));
        }

        if self.dims.height == 0 {
            return Err(Error::range("height", 0.0, 1.0, f64::from(u32::MAX)));
        }

        if self.content_layers.is_empty() {
            return Err(Error::NoLayers("content"));
        }

        if self.style_layers.is_empty() {
            return Err(Error::NoLayers("style"));
        }

        let layers = self.content_layers.iter().chain(self.style_layers.iter());
        for layer in layers {
            if !extractor.has_layer(layer) {
                return Err(Error::UnknownLayer(layer.clone()));
            }
        }

        Ok(())
    }
}

/// The state of a transfer after an iteration
pub struct ProgressUpdate<'a> {
    /// The current image, in RGB order
    pub image: &'a image::RgbImage,
    /// Index of the iteration that just finished
    pub iteration: usize,
    /// The iteration budget of the run
    pub total: usize,
    /// The loss recorded for the iteration
    pub loss: f64,
}

/// Allows a transfer to update external callers with the current image and
/// loss.
pub trait TransferProgress {
    /// Called with the starting image before the first iteration
    fn init(&mut self, _image: &image::RgbImage) {}

    fn update(&mut self, info: ProgressUpdate<'_>);

    /// Called with the final image and the loss of every iteration
    fn complete(&mut self, _image: &image::RgbImage, _history: &[f64]) {}
}

impl<G> TransferProgress for G
where
    G: FnMut(ProgressUpdate<'_>) + Send,
{
    fn update(&mut self, info: ProgressUpdate<'_>) {
        self(info)
    }
}

/// Evaluates a session's objective for either parameter form the optimizers
/// work on
struct ImageProblem<'s, B: AutodiffBackend, E: FeatureExtractor<B>> {
    session: &'s Session<B, E>,
    objective: Objective,
}

impl<'s, B: AutodiffBackend, E: FeatureExtractor<B>> Problem<Image<B>> for ImageProblem<'s, B, E> {
    fn cost(&mut self, param: &Image<B>) -> Result<f64, Error> {
        Ok(self.session.loss(self.objective, param.clone())?.total)
    }

    fn gradient(&mut self, param: &Image<B>) -> Result<(Image<B>, f64), Error> {
        let eval = self.session.loss_gradient(self.objective, param.clone())?;
        Ok((eval.gradient, eval.terms.total))
    }
}

impl<'s, B: AutodiffBackend, E: FeatureExtractor<B>> Problem<Vec<f64>> for ImageProblem<'s, B, E> {
    fn cost(&mut self, param: &Vec<f64>) -> Result<f64, Error> {
        let image = unflatten(param, self.session.dims(), &self.session.device)?;
        Problem::<Image<B>>::cost(self, &image)
    }

    fn gradient(&mut self, param: &Vec<f64>) -> Result<(Vec<f64>, f64), Error> {
        let image = unflatten(param, self.session.dims(), &self.session.device)?;
        let (gradient, loss) = Problem::<Image<B>>::gradient(self, &image)?;
        Ok((flatten(gradient)?, loss))
    }
}

/// Optimizer parameters that can be shown as an image
trait AsPixels {
    /// Interleaved RGB values
    fn rgb(&self, order: ColorOrder) -> Result<Vec<f32>, Error>;
}

impl<K: burn::tensor::backend::Backend> AsPixels for Tensor<K, 4> {
    fn rgb(&self, order: ColorOrder) -> Result<Vec<f32>, Error> {
        tensor_to_pixels(self.clone(), order)
    }
}

impl AsPixels for Vec<f64> {
    fn rgb(&self, order: ColorOrder) -> Result<Vec<f32>, Error> {
        let mut pixels: Vec<f32> = self.iter().map(|v| *v as f32).collect();
        order.restore_rgb(&mut pixels);
        Ok(pixels)
    }
}

/// Logs every iteration and forwards the current image to the caller's
/// progress callback
struct Reporter {
    label: &'static str,
    order: ColorOrder,
    dims: Dims,
    total: usize,
    progress: Option<Box<dyn TransferProgress>>,
}

impl Reporter {
    fn render<P: AsPixels>(&self, param: &P) -> Option<image::RgbImage> {
        match param.rgb(self.order) {
            Ok(pixels) => Some(utils::pixels_to_image(&pixels, self.dims)),
            Err(err) => {
                log::warn!("unable to display the current image: {}", err);
                None
            }
        }
    }
}

impl<P: AsPixels> Observer<P> for Reporter {
    fn init(&mut self, param: &P) {
        if self.progress.is_none() {
            return;
        }

        if let Some(image) = self.render(param) {
            if let Some(progress) = &mut self.progress {
                progress.init(&image);
            }
        }
    }

    fn iteration(&mut self, index: usize, loss: f64, param: &P) {
        log::info!("{} loss on iteration {}: {}", self.label, index, loss);

        if self.progress.is_none() {
            return;
        }

        if let Some(image) = self.render(param) {
            if let Some(progress) = &mut self.progress {
                progress.update(ProgressUpdate {
                    image: &image,
                    iteration: index,
                    total: self.total,
                    loss,
                });
            }
        }
    }

    fn complete(&mut self, param: &P, history: &[f64]) {
        match history.last() {
            Some(last) => log::info!(
                "{} finished after {} iterations with a loss of {}",
                self.label,
                history.len(),
                last
            ),
            None => log::info!("{} finished without running an iteration", self.label),
        }

        if self.progress.is_none() {
            return;
        }

        if let Some(image) = self.render(param) {
            if let Some(progress) = &mut self.progress {
                progress.complete(&image, history);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::loss::test::Pixels;
    use burn::backend::{Autodiff, NdArray};
    use std::sync::{Arc, Mutex};

    type B = Autodiff<NdArray>;

    fn solid(value: u8) -> ImageSource<'static> {
        ImageSource::Image(image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            4,
            4,
            image::Rgb([value, value, value]),
        )))
    }

    fn session() -> Session<B, Pixels> {
        SessionBuilder::new()
            .style(solid(230))
            .content(solid(25))
            .dims(Dims::square(4))
            .content_layers(vec!["pixels"])
            .style_layers(vec!["pixels"])
            .build(Pixels, &Default::default())
            .unwrap()
    }

    #[test]
    fn noise_start_is_seeded() {
        let a = session().synthetic();
        let b = session().synthetic();
        assert_eq!(
            flatten(a.clone()).unwrap(),
            flatten(b).unwrap(),
            "same seed should give the same start"
        );
        assert_eq!(a.dims(), [1, 4, 4, 3]);
    }

    #[test]
    fn initial_image_replaces_noise() {
        let mut session = session();
        session.set_initial_image(solid(255)).unwrap();

        let start = flatten(session.synthetic()).unwrap();
        assert!(start.iter().all(|v| (*v - 1.0).abs() < 1e-6));

        let terms = session
            .loss(Objective::Content, session.synthetic())
            .unwrap();
        assert!(terms.total > 0.0);
    }

    #[test]
    fn progress_sees_every_iteration() {
        let session = session();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let progress = {
            let seen = Arc::clone(&seen);
            move |update: ProgressUpdate<'_>| {
                assert_eq!(update.image.dimensions(), (4, 4));
                seen.lock().unwrap().push((update.iteration, update.total));
            }
        };

        let params = RunParams {
            step_size: 0.5,
            iters: 3,
            ..RunParams::default()
        };
        let out = session
            .transfer_content(&params, Some(Box::new(progress)))
            .unwrap();

        assert_eq!(out.loss_history().len(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn flat_problem_matches_tensor_problem() {
        let session = session();
        let mut problem = ImageProblem {
            session: &session,
            objective: Objective::Style,
        };

        let image = session.synthetic();
        let (tensor_grad, tensor_loss) =
            Problem::<Image<B>>::gradient(&mut problem, &image).unwrap();
        let (flat_grad, flat_loss) =
            Problem::<Vec<f64>>::gradient(&mut problem, &flatten(image).unwrap()).unwrap();

        assert!((tensor_loss - flat_loss).abs() <= 1e-12 * tensor_loss.abs().max(1.0));
        assert_eq!(flatten(tensor_grad).unwrap(), flat_grad);
    }
}
