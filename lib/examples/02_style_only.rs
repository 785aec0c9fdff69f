use style_transfer as st;

type B = st::burn::backend::Autodiff<st::burn::backend::NdArray>;

fn main() -> Result<(), st::Error> {
    let device = Default::default();
    let vgg = st::Vgg::<B>::load(st::VggConfig::vgg19(), "vgg19.mpk", &device)?;

    let session = st::SessionBuilder::new()
        .style(&"imgs/style.jpg")
        .content(&"imgs/content.jpg")
        // only the first layers, which capture fine grained texture
        .style_layers(vec!["conv1_1", "conv2_1", "conv3_1"])
        .seed(42)
        .build(vgg, &device)?;

    // synthesize a texture from the style's Gram statistics alone
    let stylized = session.transfer_style(&st::RunParams::default(), None)?;

    stylized.save("out/02.jpg")
}
