// BEGIN - Embark standard lints v0.4
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_on_vec_items,
    clippy::match_same_arms,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mismatched_target_os,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v0.4

//! `style-transfer` is a light API for neural style transfer: it synthesizes
//! an image with the structure of a *content* image and the texture of a
//! *style* image by optimizing the image itself against losses measured on
//! the activations of a fixed convolutional network.
//!
//! First, you build a `Session` via a `SessionBuilder`, which follows the builder pattern. Calling
//! `build` on the `SessionBuilder` loads the reference images, checks for various errors and
//! computes the content activations and style Gram matrices every run is optimized towards.
//!
//! `Session` has `transfer_content`, `transfer_style` and `transfer` methods that take a set of
//! `RunParams` and return a `Stylized` image, along with the loss recorded at every iteration.
//!
//! ## Usage
//! Session follows a "builder pattern" for defining parameters, meaning you chain functions together.
//!
//! ```no_run
//! use style_transfer::{burn::backend::{Autodiff, NdArray}, Vgg, VggConfig};
//!
//! let device = Default::default();
//! // Load a pretrained network
//! let vgg = Vgg::<Autodiff<NdArray>>::load(VggConfig::vgg19(), "vgg19.mpk", &device)
//!     .expect("failed to load network weights");
//!
//! // Create a new session with default parameters
//! let session = style_transfer::SessionBuilder::new()
//!     // Set some parameters
//!     .seed(10)
//!     .dims(style_transfer::Dims::square(256))
//!     // Specify reference images
//!     .style(&"imgs/style.jpg")
//!     .content(&"imgs/content.jpg")
//!     // Build the session
//!     .build(vgg, &device).expect("failed to build session");
//!
//! // Optimize a new image
//! let params = style_transfer::RunParams::default();
//! let stylized = session.transfer(&params, None).expect("failed to transfer style");
//!
//! // Save the stylized image to disk
//! stylized.save("my_stylized_img.jpg").expect("failed to save stylized image");
//! ```
mod errors;
mod extractor;
mod gram;
pub mod loss;
pub mod optimize;
mod output;
mod params;
pub mod session;
mod utils;
mod vgg;

pub use burn;
pub use image;

pub use errors::{Error, InvalidRange, ShapeMismatch};
pub use extractor::{Activations, ColorOrder, FeatureExtractor};
pub use gram::gram_matrix;
pub use loss::{LossContext, LossTerms, Objective, Weights};
pub use optimize::{CancelToken, Termination};
pub use output::Stylized;
pub use params::{timeout_from_secs, Algorithm, RunParams};
pub use session::{ProgressUpdate, Session, SessionBuilder, TransferProgress};
pub use utils::{
    flatten, image_to_tensor, load_dynamic_image, pixels_to_image, tensor_to_pixels, unflatten,
    ImageSource,
};
pub use vgg::{Pooling, Vgg, VggConfig, VggWeights, IMAGENET_MEAN_BGR};

/// Simple dimensions struct
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The `[1, height, width, 3]` shape of an image tensor of this size
    pub fn image_shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, 3]
    }
}
