use style_transfer as st;

type B = st::burn::backend::Autodiff<st::burn::backend::NdArray>;

fn main() -> Result<(), st::Error> {
    let device = Default::default();

    // average pooling tends to give smoother results than max pooling
    let config = st::VggConfig::vgg19().with_pooling(st::Pooling::Average);
    let vgg = st::Vgg::<B>::load(config, "vgg19.mpk", &device)?;

    let mut session = st::SessionBuilder::new()
        .style(&"imgs/style.jpg")
        .content(&"imgs/content.jpg")
        .dims(st::Dims::new(320, 240))
        .build(vgg, &device)?;

    // starting from the content image converges a lot faster than from noise
    session.set_initial_image(&"imgs/content.jpg")?;

    let params = st::RunParams::from_pairs(vec![
        ("type", "lbfgs"),
        ("iters", "50"),
        ("alpha", "1"),
        ("beta", "10000"),
    ])?;

    let stylized = session.transfer(
        &params,
        Some(Box::new(|update: st::ProgressUpdate<'_>| {
            println!(
                "{}/{}: {}",
                update.iteration + 1,
                update.total,
                update.loss
            );
        })),
    )?;

    stylized.save("out/03.jpg")?;
    stylized.save_loss_plot("out/03_loss.png")
}
