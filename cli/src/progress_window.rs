#[cfg(feature = "progress")]
use style_transfer::{Dims, Error};

use indicatif::{ProgressBar, ProgressStyle};
#[cfg(feature = "progress")]
use minifb::Window;
use style_transfer::image::RgbImage;

pub struct ProgressWindow {
    #[cfg(feature = "progress")]
    window: Option<(Window, std::time::Duration, std::time::Instant)>,

    iter_pb: ProgressBar,
    iter_len: usize,
}

impl ProgressWindow {
    pub fn new() -> Self {
        let sty = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>4}/{len:4} loss {msg}")
            .progress_chars("##-");

        let iter_pb = ProgressBar::new(100);
        iter_pb.set_style(sty);

        Self {
            #[cfg(feature = "progress")]
            window: None,
            iter_pb,
            iter_len: 100,
        }
    }

    #[cfg(feature = "progress")]
    pub fn with_preview(
        mut self,
        size: Dims,
        update_every: std::time::Duration,
    ) -> Result<Self, Error> {
        let window = Window::new(
            "Style Transfer",
            size.width as usize,
            size.height as usize,
            minifb::WindowOptions::default(),
        )
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        self.window = Some((window, update_every, std::time::Instant::now()));

        Ok(self)
    }

    #[cfg(feature = "progress")]
    fn show(&mut self, image: &RgbImage, force: bool) {
        if let Some((ref mut window, ref dur, ref mut last_update)) = self.window {
            let now = std::time::Instant::now();

            if !force && now - *last_update < *dur {
                return;
            }

            *last_update = now;

            if !window.is_open() {
                return;
            }

            // minifb wants 0RGB packed into a u32
            let pixels: Vec<u32> = image
                .pixels()
                .map(|p| (u32::from(p[0]) << 16) | (u32::from(p[1]) << 8) | u32::from(p[2]))
                .collect();

            // We don't particularly care if this fails
            let _ = window.update_with_buffer(
                &pixels,
                image.width() as usize,
                image.height() as usize,
            );
        }
    }

    #[cfg(not(feature = "progress"))]
    #[allow(clippy::unused_self)]
    fn show(&mut self, _image: &RgbImage, _force: bool) {}
}

impl Drop for ProgressWindow {
    fn drop(&mut self) {
        self.iter_pb.finish();
    }
}

impl style_transfer::TransferProgress for ProgressWindow {
    fn init(&mut self, image: &RgbImage) {
        self.show(image, true);
    }

    fn update(&mut self, update: style_transfer::ProgressUpdate<'_>) {
        if update.total != self.iter_len {
            self.iter_len = update.total;
            self.iter_pb.set_length(self.iter_len as u64);
        }

        self.iter_pb.set_position(update.iteration as u64 + 1);
        self.iter_pb.set_message(&format!("{:.4e}", update.loss));

        self.show(update.image, false);
    }

    fn complete(&mut self, image: &RgbImage, _history: &[f64]) {
        self.iter_pb.finish();
        self.show(image, true);
    }
}
