use style_transfer as st;

type B = st::burn::backend::Autodiff<st::burn::backend::NdArray>;

fn main() -> Result<(), st::Error> {
    let device = Default::default();

    //load the pretrained network
    let vgg = st::Vgg::<B>::load(st::VggConfig::vgg19(), "vgg19.mpk", &device)?;

    //create a new session
    let session = st::SessionBuilder::new()
        .style(&"imgs/style.jpg")
        .content(&"imgs/content.jpg")
        .build(vgg, &device)?;

    //reconstruct the content image from noise, using only its activations
    let params = st::RunParams {
        out_dir: Some("out".into()),
        name: "01".to_owned(),
        ..st::RunParams::default()
    };

    //the image and a plot of the loss are saved to out/content_only_01*
    session.transfer_content(&params, None)?;
    Ok(())
}
