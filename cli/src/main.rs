use structopt::StructOpt;

use std::path::PathBuf;
use style_transfer::{
    burn::backend::{Autodiff, NdArray},
    image::ImageOutputFormat as ImgFmt,
    timeout_from_secs, Algorithm, Dims, Error, Objective, Pooling, RunParams, SessionBuilder,
    TransferProgress, Vgg, VggConfig, Weights,
};

mod progress_window;
use progress_window::ProgressWindow;

type Backend = Autodiff<NdArray>;

fn parse_size(input: &str) -> Result<(u32, u32), std::num::ParseIntError> {
    let mut i = input.splitn(2, 'x');

    let x: u32 = i.next().unwrap_or("").parse()?;
    let y: u32 = match i.next() {
        Some(num) => num.parse()?,
        None => x,
    };
    Ok((x, y))
}

fn parse_img_fmt(input: &str) -> Result<ImgFmt, String> {
    let fmt = match input {
        "png" => ImgFmt::Png,
        "jpg" => ImgFmt::Jpeg(75),
        "bmp" => ImgFmt::Bmp,
        other => {
            return Err(format!(
                "image format `{}` not one of: 'png', 'jpg', 'bmp'",
                other
            ))
        }
    };

    Ok(fmt)
}

fn parse_network(input: &str) -> Result<VggConfig, String> {
    match input {
        "vgg19" => Ok(VggConfig::vgg19()),
        "vgg16" => Ok(VggConfig::vgg16()),
        other => Err(format!("network `{}` not one of: 'vgg19', 'vgg16'", other)),
    }
}

fn parse_pooling(input: &str) -> Result<Pooling, String> {
    match input {
        "max" => Ok(Pooling::Max),
        "avg" => Ok(Pooling::Average),
        other => Err(format!("pooling `{}` not one of: 'max', 'avg'", other)),
    }
}

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
struct Combined {
    /// Weight of the content loss
    #[structopt(long, default_value = "1.0")]
    alpha: f64,
    /// Weight of the style loss
    #[structopt(long, default_value = "1000.0")]
    beta: f64,
}

#[derive(StructOpt)]
enum Subcommand {
    /// Reconstructs the content image from its activations alone
    #[structopt(name = "content")]
    Content,
    /// Synthesizes a texture from the statistics of the style image alone
    #[structopt(name = "style")]
    Style,
    /// Renders the content image in the style of the style image
    #[structopt(name = "transfer")]
    Transfer(Combined),
}

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
struct Tweaks {
    /// The optimizer, one of 'sgd' or 'lbfgs'
    #[structopt(long, default_value = "sgd")]
    algorithm: Algorithm,
    /// The learning rate of 'sgd'
    #[structopt(long, default_value = "10.0")]
    step_size: f64,
    /// The number of optimizer iterations
    #[structopt(long, default_value = "100")]
    iters: usize,
    /// The momentum of 'sgd', 0 is plain gradient descent. Range [0.0, 1.0).
    #[structopt(long, default_value = "0.0")]
    gamma: f64,
    /// The number of curvature pairs 'lbfgs' remembers
    #[structopt(long, default_value = "7")]
    history_size: usize,
    /// Stops the optimizer after this many seconds
    #[structopt(long)]
    timeout: Option<f64>,
    #[structopt(long = "window")]
    #[cfg(feature = "progress")]
    #[cfg_attr(feature = "progress", structopt(long = "window"))]
    #[cfg_attr(
        feature = "progress",
        doc = "Show a window with the current image as it is optimized"
    )]
    show_window: bool,
    /// Don't show the progress bar
    #[structopt(long)]
    no_progress: bool,
    /// A seed value for the white noise the optimization starts from
    #[structopt(long)]
    seed: Option<u64>,
}

#[derive(StructOpt)]
#[structopt(
    name = "style-transfer",
    about = "Transfers the style of one image onto the content of another",
    rename_all = "kebab-case"
)]
struct Opt {
    /// Path to the network weights, a named MessagePack record of the network
    #[structopt(long, parse(from_os_str))]
    weights: PathBuf,
    /// The network topology the weights belong to, 'vgg19' or 'vgg16'
    #[structopt(long, default_value = "vgg19", parse(try_from_str = parse_network))]
    network: VggConfig,
    /// The pooling between the network's blocks, 'max' or 'avg'
    #[structopt(long, default_value = "max", parse(try_from_str = parse_pooling))]
    pooling: Pooling,
    /// The image from which the style will be be sourced
    #[structopt(long, parse(from_os_str))]
    style: PathBuf,
    /// The image whose structure is kept
    #[structopt(long, parse(from_os_str))]
    content: PathBuf,
    /// An image to start from instead of white noise
    #[structopt(long, parse(from_os_str))]
    initial: Option<PathBuf>,
    /// Layer(s) making up the content representation, defaults to `conv4_2`
    #[structopt(long = "content-layer")]
    content_layers: Vec<String>,
    /// Layer(s) making up the style representation, defaults to `conv1_1`
    /// through `conv5_1`
    #[structopt(long = "style-layer")]
    style_layers: Vec<String>,
    /// Size of the generated image, in `width x height`, or a single number for both dimensions
    #[structopt(
        long,
        default_value = "240",
        parse(try_from_str = parse_size)
    )]
    out_size: (u32, u32),
    /// The format to save the generated image as.
    ///
    /// NOTE: this will only apply when stdout is specified via `-o -`, otherwise the image
    /// format is determined by the file extension of the path provided to `-o`
    #[structopt(
        long,
        default_value = "png",
        parse(try_from_str = parse_img_fmt)
    )]
    out_fmt: ImgFmt,
    /// The path to save the generated image to, the file extensions of the path determines
    /// the image format used. You may use `-` for stdout.
    #[structopt(long = "out", short, parse(from_os_str))]
    output_path: PathBuf,
    /// A directory into which the result and a plot of the loss history are
    /// also saved, named after the objective and `--name`
    #[structopt(long, parse(from_os_str))]
    out_dir: Option<PathBuf>,
    /// The name of the run, used for the files in `--out-dir`
    #[structopt(long, default_value = "transfer")]
    name: String,
    #[structopt(flatten)]
    tweaks: Tweaks,
    #[structopt(subcommand)]
    cmd: Subcommand,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = real_main() {
        if atty::is(atty::Stream::Stderr) {
            eprintln!("\x1b[31merror\x1b[0m: {}", e);
        } else {
            eprintln!("error: {}", e);
        }

        std::process::exit(1);
    }
}

fn real_main() -> Result<(), Error> {
    let args = Opt::from_args();

    // Check that the extension for the path supplied by the user is one of the ones we support
    {
        match args.output_path.extension().and_then(|ext| ext.to_str()) {
            Some("png") | Some("jpg") | Some("bmp") => {}
            None => {}
            Some(other) => return Err(Error::UnsupportedOutputFormat(other.to_owned())),
        }
    }

    let timeout = args.tweaks.timeout.map(timeout_from_secs).transpose()?;

    let device = Default::default();
    let config = args.network.clone().with_pooling(args.pooling);
    let vgg = Vgg::<Backend>::load(config, &args.weights, &device)?;

    let out_size = Dims::new(args.out_size.0, args.out_size.1);

    let mut sb = SessionBuilder::new()
        .style(&args.style)
        .content(&args.content)
        .dims(out_size)
        .seed(args.tweaks.seed.unwrap_or_default());

    if let Some(ref initial) = args.initial {
        sb = sb.initial(initial);
    }

    if !args.content_layers.is_empty() {
        sb = sb.content_layers(args.content_layers.iter().cloned());
    }

    if !args.style_layers.is_empty() {
        sb = sb.style_layers(args.style_layers.iter().cloned());
    }

    let session = sb.build(vgg, &device)?;

    let (objective, weights) = match &args.cmd {
        Subcommand::Content => (Objective::Content, Weights::default()),
        Subcommand::Style => (Objective::Style, Weights::default()),
        Subcommand::Transfer(c) => {
            let weights = Weights::new(c.alpha, c.beta);
            (Objective::Combined(weights), weights)
        }
    };

    let params = RunParams {
        algorithm: args.tweaks.algorithm,
        step_size: args.tweaks.step_size,
        iters: args.tweaks.iters,
        gamma: args.tweaks.gamma,
        history_size: args.tweaks.history_size,
        alpha: weights.alpha,
        beta: weights.beta,
        out_dir: args.out_dir.clone(),
        name: args.name.clone(),
        timeout,
        cancel: None,
    };

    let progress: Option<Box<dyn TransferProgress>> = if !args.tweaks.no_progress {
        let progress = ProgressWindow::new();

        #[cfg(feature = "progress")]
        let progress = {
            if args.tweaks.show_window {
                progress.with_preview(out_size, std::time::Duration::from_millis(100))?
            } else {
                progress
            }
        };

        Some(Box::new(progress))
    } else {
        None
    };

    let stylized = session.run(objective, &params, progress)?;

    if stylized.diverged() {
        log::warn!("the loss diverged, consider lowering the step size");
    }

    if args.output_path.to_str() == Some("-") {
        let out = std::io::stdout();
        let mut out = out.lock();
        stylized.write(&mut out, args.out_fmt)?;
    } else {
        // This won't respect the output format specified by the user,
        // only the extension on the path they specify, but that makes
        // more sense, and is probably better than detecting and emitting
        // an error
        stylized.save(&args.output_path)?;
    }

    Ok(())
}
