use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use st::burn::{
    backend::{Autodiff, NdArray},
    tensor::{Tensor, TensorData},
};
use style_transfer as st;

type B = Autodiff<NdArray>;

fn image(dim: u32) -> st::image::DynamicImage {
    st::image::DynamicImage::ImageRgb8(st::image::RgbImage::from_fn(dim, dim, |x, y| {
        st::image::Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
    }))
}

fn gram(c: &mut Criterion) {
    let mut group = c.benchmark_group("gram");

    for channels in [16usize, 64, 128].iter() {
        let len = 32 * 32 * channels;
        let values: Vec<f32> = (0..len).map(|i| (i % 13) as f32 / 13.0).collect();
        let features = Tensor::<NdArray, 4>::from_data(
            TensorData::new(values, [1, 32, 32, *channels]),
            &Default::default(),
        );

        group.bench_with_input(
            BenchmarkId::from_parameter(channels),
            &features,
            |b, features| {
                b.iter(|| black_box(st::gram_matrix(features.clone()).unwrap()));
            },
        );
    }
    group.finish();
}

fn loss_gradient(c: &mut Criterion) {
    static DIM: u32 = 16;

    let device = Default::default();
    let mut group = c.benchmark_group("loss_gradient");
    group.sample_size(10);

    for dim in [DIM, 2 * DIM, 4 * DIM].iter() {
        let vgg = st::Vgg::<B>::new(st::VggConfig::new(vec![(16, 2), (32, 2)]), &device);
        let sess = st::SessionBuilder::new()
            .style(image(*dim))
            .content(image(*dim / 2))
            .dims(st::Dims::square(*dim))
            .content_layers(vec!["conv2_2"])
            .style_layers(vec!["conv1_1", "conv2_1"])
            .build(vgg, &device)
            .unwrap();

        let objective = st::Objective::Combined(st::Weights::default());

        group.bench_with_input(BenchmarkId::from_parameter(dim), &sess, |b, sess| {
            b.iter(|| black_box(sess.loss_gradient(objective, sess.synthetic()).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, gram, loss_gradient);
criterion_main!(benches);
