use crate::Error;
use burn::tensor::{backend::Backend, Tensor};

/// Computes the Gram matrix of a `[1, H, W, C]` feature map.
///
/// The map is viewed as an `(H * W) x C` matrix `F`, with spatial positions as
/// rows and channels as columns, and the `C x C` product `F^T F` is returned.
pub fn gram_matrix<B: Backend>(features: Tensor<B, 4>) -> Result<Tensor<B, 2>, Error> {
    let [batch, height, width, channels] = features.dims();
    if batch != 1 {
        return Err(Error::shape(
            &[1, height, width, channels],
            &[batch, height, width, channels],
        ));
    }

    let f = features.reshape([height * width, channels]);
    Ok(f.clone().transpose().matmul(f))
}

/// `H * W` of a `[1, H, W, C]` feature map, the `M_l` of the style loss
pub(crate) fn feature_map_size(dims: [usize; 4]) -> usize {
    dims[1] * dims[2]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::tensor_values;
    use burn::{backend::NdArray, tensor::TensorData};

    type B = NdArray;

    fn features(h: usize, w: usize, c: usize) -> Tensor<B, 4> {
        let values: Vec<f32> = (0..h * w * c)
            .map(|i| ((i * 7 + 3) % 11) as f32 / 5.0 - 1.0)
            .collect();
        Tensor::from_data(TensorData::new(values, [1, h, w, c]), &Default::default())
    }

    #[test]
    fn gram_is_channels_square() {
        let gram = gram_matrix(features(3, 5, 4)).unwrap();
        assert_eq!(gram.dims(), [4, 4]);
    }

    #[test]
    fn gram_is_symmetric() {
        let c = 6;
        let gram = tensor_values(gram_matrix(features(4, 3, c)).unwrap()).unwrap();

        for i in 0..c {
            for j in 0..c {
                let (a, b) = (gram[i * c + j], gram[j * c + i]);
                assert!((a - b).abs() <= 1e-5 * a.abs().max(1.0), "{} != {}", a, b);
            }
        }
    }

    #[test]
    fn gram_is_positive_semi_definite() {
        let c = 5;
        let gram = tensor_values(gram_matrix(features(3, 3, c)).unwrap()).unwrap();

        // x^T G x = |F x|^2 >= 0 for any x
        let probes: [[f32; 5]; 4] = [
            [1.0, 0.0, 0.0, 0.0, 0.0],
            [1.0, -1.0, 1.0, -1.0, 1.0],
            [0.3, 2.0, -0.7, 0.1, -1.5],
            [-4.0, 0.5, 0.5, 3.0, 0.0],
        ];

        for x in probes.iter() {
            let mut quad = 0.0f64;
            for i in 0..c {
                for j in 0..c {
                    quad += f64::from(x[i] * gram[i * c + j] * x[j]);
                }
            }
            assert!(quad >= -1e-3, "x^T G x = {}", quad);
        }

        for i in 0..c {
            assert!(gram[i * c + i] >= 0.0);
        }
    }

    #[test]
    fn gram_matches_hand_computation() {
        // 1x2x1x2 map: positions (1, 2) and (3, 4)
        let f = Tensor::<B, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 2, 1, 2]),
            &Default::default(),
        );
        let gram = tensor_values(gram_matrix(f).unwrap()).unwrap();
        assert_eq!(gram, vec![10.0, 14.0, 14.0, 20.0]);
    }

    #[test]
    fn gram_rejects_batches() {
        let f = Tensor::<B, 4>::zeros([2, 2, 2, 3], &Default::default());
        assert!(matches!(gram_matrix(f), Err(Error::ShapeMismatch(_))));
    }
}
