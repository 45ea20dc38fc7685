//! Auxiliary scene parameters.

pub use super::*;

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// A per-view conditioning value broadcast to every sample query of that view.
///
/// It can carry a scalar (metallicity, light intensity) or a small vector
/// (diffuse colour, light position).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum AuxParam {
    /// The field is unconditioned.
    #[default]
    Absent,
    /// The conditioning vector.
    Present(Vec<f32>),
}

impl AuxParam {
    #[inline]
    pub fn scalar(value: f32) -> Self {
        Self::Present(vec![value])
    }

    /// The dimension, `0` if absent.
    #[inline]
    pub fn dim(&self) -> usize {
        match self {
            Self::Absent => 0,
            Self::Present(values) => values.len(),
        }
    }

    /// Checks the dimension against what a field expects.
    pub fn expect_dim(
        &self,
        dim: usize,
    ) -> Result<(), Error> {
        let found = self.dim();
        let is_matched = match self {
            Self::Absent => dim == 0,
            Self::Present(_) => found == dim && dim != 0,
        };
        if is_matched {
            Ok(())
        } else {
            Err(Error::MismatchedAuxParam {
                expected: dim,
                found,
            })
        }
    }

    /// Broadcasts the vector to `row_count` rows.
    ///
    /// ## Shapes
    ///
    /// * output - `[row_count, A]`
    pub fn to_rows<B: Backend>(
        &self,
        row_count: usize,
        device: &B::Device,
    ) -> Option<Tensor<B, 2>> {
        match self {
            Self::Absent => None,
            Self::Present(values) => {
                let dim = values.len();
                let row = Tensor::<B, 2>::from_data(
                    TensorData::new(values.to_owned(), [1, dim]),
                    device,
                );
                Some(row.expand([row_count, dim]))
            },
        }
    }

    /// Light intensity sweep used for spiral videos.
    ///
    /// `|sin(t * pi / 2)|^2` for `t` evenly spaced over `[0, 2]`.
    pub fn light_sweep(count: usize) -> Vec<Self> {
        let step = if count > 1 {
            2.0 / (count - 1) as f32
        } else {
            0.0
        };
        (0..count)
            .map(|index| {
                let value = (index as f32 * step * FRAC_PI_2).sin().abs().powi(2);
                Self::scalar(value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn expect_dim() {
        use super::*;

        assert!(AuxParam::Absent.expect_dim(0).is_ok());
        assert!(AuxParam::scalar(0.5).expect_dim(1).is_ok());
        assert!(AuxParam::Present(vec![0.1, 0.2, 0.3]).expect_dim(3).is_ok());

        let error = AuxParam::Absent.expect_dim(1).unwrap_err();
        assert!(matches!(
            error,
            Error::MismatchedAuxParam {
                expected: 1,
                found: 0
            }
        ));
        assert!(AuxParam::scalar(0.5).expect_dim(0).is_err());
        assert!(AuxParam::scalar(0.5).expect_dim(3).is_err());
    }

    #[test]
    fn light_sweep() {
        use super::*;

        let sweep = AuxParam::light_sweep(5);
        let values = sweep
            .iter()
            .map(|param| match param {
                AuxParam::Present(values) => values[0],
                AuxParam::Absent => f32::NAN,
            })
            .collect::<Vec<_>>();
        let target = [0.0, 0.5, 1.0, 0.5, 0.0];

        values.iter().zip(target).for_each(|(value, target)| {
            assert!((value - target).abs() < 1e-6, "{values:?}");
        });
        assert_eq!(AuxParam::light_sweep(1), vec![AuxParam::scalar(0.0)]);
    }

    #[test]
    fn to_rows() {
        use super::*;
        use crate::backend::NdArray;

        let device = &Default::default();
        let rows = AuxParam::Present(vec![0.25, 0.75])
            .to_rows::<NdArray>(3, device)
            .unwrap();
        assert_eq!(rows.dims(), [3, 2]);
        assert_eq!(
            rows.into_vec_f32().unwrap(),
            vec![0.25, 0.75, 0.25, 0.75, 0.25, 0.75]
        );
        assert!(AuxParam::Absent.to_rows::<NdArray>(3, device).is_none());
    }
}
