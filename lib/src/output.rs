use crate::{optimize::Termination, utils::pixels_to_image, Dims, Error};
use std::path::Path;

/// An image produced by a transfer run, along with the loss recorded at every
/// iteration.
pub struct Stylized {
    pixels: Vec<f32>,
    dims: Dims,
    history: Vec<f64>,
    termination: Termination,
}

impl Stylized {
    pub(crate) fn new(
        mut pixels: Vec<f32>,
        dims: Dims,
        history: Vec<f64>,
        termination: Termination,
    ) -> Self {
        for v in &mut pixels {
            *v = if v.is_nan() { 0.0 } else { v.max(0.0).min(1.0) };
        }

        Self {
            pixels,
            dims,
            history,
            termination,
        }
    }

    /// RGB values in `[0, 1]`, row major
    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// The loss of every iteration that ran
    pub fn loss_history(&self) -> &[f64] {
        &self.history
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// True if any recorded loss was NaN or infinite
    pub fn diverged(&self) -> bool {
        self.history.iter().any(|l| !l.is_finite())
    }

    pub fn image(&self) -> image::RgbImage {
        pixels_to_image(&self.pixels, self.dims)
    }

    pub fn into_image(self) -> image::DynamicImage {
        image::DynamicImage::ImageRgb8(self.image())
    }

    /// Saves the image to the specified path, the format is inferred from the
    /// extension
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent_path) = path.parent() {
            std::fs::create_dir_all(&parent_path)?;
        }

        self.image().save(&path)?;
        Ok(())
    }

    /// Writes the image to the specified stream
    pub fn write<W: std::io::Write>(
        self,
        writer: &mut W,
        fmt: image::ImageOutputFormat,
    ) -> Result<(), Error> {
        let dyn_img = self.into_image();
        Ok(dyn_img.write_to(writer, fmt)?)
    }

    /// Draws the loss history as a line plot. Non-finite losses are left out.
    pub fn save_loss_plot<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        plot_losses(path.as_ref(), &self.history)
    }
}

fn plot_err<E: std::fmt::Debug>(err: E) -> Error {
    Error::Plot(format!("{:?}", err))
}

fn plot_losses(path: &Path, history: &[f64]) -> Result<(), Error> {
    use plotters::prelude::*;

    if let Some(parent_path) = path.parent() {
        std::fs::create_dir_all(&parent_path)?;
    }

    let points: Vec<(f64, f64)> = history
        .iter()
        .enumerate()
        .filter(|(_, loss)| loss.is_finite())
        .map(|(i, loss)| (i as f64, *loss))
        .collect();

    let x_max = (history.len().max(2) - 1) as f64;
    let (mut y_min, mut y_max) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, y)| {
            (lo.min(*y), hi.max(*y))
        });

    if points.is_empty() {
        y_min = 0.0;
        y_max = 1.0;
    } else if y_max - y_min <= f64::EPSILON * y_max.abs().max(1.0) {
        y_min -= 0.5;
        y_max += 0.5;
    }

    let root = BitMapBackend::new(path, (640, 480)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(0f64..x_max, y_min..y_max)
        .map_err(plot_err)?;

    chart
        .draw_series(LineSeries::new(points, &BLUE))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}
