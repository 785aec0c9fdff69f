use crate::Dims;
use std::fmt;

#[derive(Debug)]
pub struct InvalidRange {
    pub(crate) min: f64,
    pub(crate) max: f64,
    pub(crate) value: f64,
    pub(crate) name: &'static str,
}

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter '{}' - value '{}' is outside the range of {}-{}",
            self.name, self.value, self.min, self.max
        )
    }
}

#[derive(Debug)]
pub struct ShapeMismatch {
    pub(crate) expected: Vec<usize>,
    pub(crate) actual: Vec<usize>,
}

impl fmt::Display for ShapeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected a tensor of shape {:?}, but got one of shape {:?}",
            self.expected, self.actual
        )
    }
}

#[derive(Debug)]
pub enum Error {
    /// An error in the image library occurred, eg failed to load/save
    Image(image::ImageError),
    /// Io is notoriously error free with no problems, but we cover it just in case!
    Io(std::io::Error),
    /// An input parameter had an invalid range specified
    InvalidRange(InvalidRange),
    /// An image or feature map did not have the shape required at an
    /// evaluation boundary, and could not be reshaped into it
    ShapeMismatch(ShapeMismatch),
    /// The optimizer selector wasn't one of `sgd` or `lbfgs`
    UnsupportedAlgorithm(String),
    /// A run option that isn't recognized
    UnknownOption(String),
    /// A run option whose value could not be parsed
    InvalidOption(String, String),
    /// No layers were configured for the content or style representation
    NoLayers(&'static str),
    /// The feature extractor doesn't expose a layer with this name
    UnknownLayer(String),
    /// The input is too small for the feature map of this layer to be computed
    LayerUnreachable(String, Dims),
    /// The style or content image was never provided
    MissingImage(&'static str),
    /// Differentiation didn't produce a gradient for the image
    MissingGradient,
    /// Tensor data could not be read back from the backend
    Tensor(String),
    /// The feature extractor weights could not be loaded
    Weights(String),
    /// The loss plot could not be drawn
    Plot(String),
    /// The user specified an image format we don't support as the output
    UnsupportedOutputFormat(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Image(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(ie) => write!(f, "{}", ie),
            Self::Io(io) => write!(f, "{}", io),
            Self::InvalidRange(ir) => write!(f, "{}", ir),
            Self::ShapeMismatch(sm) => write!(f, "{}", sm),
            Self::UnsupportedAlgorithm(name) => write!(
                f,
                "the optimizer '{}' is not supported, expected one of: 'sgd', 'lbfgs'",
                name
            ),
            Self::UnknownOption(key) => write!(f, "unknown run option '{}'", key),
            Self::InvalidOption(key, value) => {
                write!(f, "invalid value '{}' for run option '{}'", value, key)
            }
            Self::NoLayers(kind) => write!(f, "at least 1 {} layer must be specified", kind),
            Self::UnknownLayer(name) => {
                write!(f, "the feature extractor has no layer named '{}'", name)
            }
            Self::LayerUnreachable(name, dims) => write!(
                f,
                "layer '{}' cannot be computed for an input of {}x{}",
                name, dims.width, dims.height
            ),
            Self::MissingImage(kind) => write!(f, "a {} image must be provided", kind),
            Self::MissingGradient => write!(f, "no gradient was recorded for the image"),
            Self::Tensor(msg) => write!(f, "failed to read tensor data: {}", msg),
            Self::Weights(msg) => write!(f, "failed to load network weights: {}", msg),
            Self::Plot(msg) => write!(f, "failed to draw the loss plot: {}", msg),
            Self::UnsupportedOutputFormat(fmt) => {
                write!(f, "the output format '{}' is not supported", fmt)
            }
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(ie: image::ImageError) -> Self {
        Self::Image(ie)
    }
}

impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Self {
        Self::Io(io)
    }
}

impl Error {
    pub(crate) fn shape(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch(ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }

    pub(crate) fn range(name: &'static str, value: f64, min: f64, max: f64) -> Self {
        Self::InvalidRange(InvalidRange {
            min,
            max,
            value,
            name,
        })
    }
}
