use crate::error::Error;
use burn::tensor::{backend, Float, Tensor};

pub trait TensorFloatExtension: Sized {
    /// `[..., 1, x_0, x_0 * x_1, ..., x_0 * ... * x_(n-2), ...]` along `dim`
    fn prod_cumulative_exclusive(
        self,
        dim: usize,
    ) -> Self;

    /// Reads the values back to host memory in row-major order.
    fn into_vec_f32(self) -> Result<Vec<f32>, Error>;
}

impl<B: backend::Backend, const D: usize> TensorFloatExtension
    for Tensor<B, D, Float>
{
    fn prod_cumulative_exclusive(
        self,
        dim: usize,
    ) -> Self {
        assert!(dim < D, "dim should be less than self.dims().len()");

        let count = self.dims()[dim];
        if count == 0 {
            return self;
        }

        let dims_batch = {
            let mut dims = self.dims();
            dims[dim] = 1;
            dims
        };
        let mut state_batch = Tensor::ones(dims_batch, &self.device());
        let mut result = Vec::with_capacity(count);

        for value_batch in self.iter_dim(dim) {
            result.push(state_batch.to_owned());
            state_batch = state_batch * value_batch;
        }

        Tensor::cat(result, dim)
    }

    fn into_vec_f32(self) -> Result<Vec<f32>, Error> {
        self.into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| Error::Tensor(format!("{err:?}")))
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn prod_cumulative_exclusive() {
        use super::*;
        use crate::backend::NdArray;

        type B = NdArray;
        let device = &Default::default();

        let input = Tensor::<B, 2>::from_data(
            [[2.0, 3.0, 4.0, 0.5], [1.0, 0.0, 7.0, 2.0]],
            device,
        );
        let output = input.prod_cumulative_exclusive(1).into_vec_f32().unwrap();
        assert_eq!(output, vec![1.0, 2.0, 6.0, 24.0, 1.0, 1.0, 0.0, 0.0]);

        let input = Tensor::<B, 2>::from_data([[2.0], [3.0]], device);
        let output = input.prod_cumulative_exclusive(0).into_vec_f32().unwrap();
        assert_eq!(output, vec![1.0, 2.0]);
    }
}
