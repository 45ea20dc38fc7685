//! Scene representations queried by the volume renderer.

pub mod auxiliary;
pub mod nerf;
pub mod query;

pub use crate::{error::Error, function::TensorFloatExtension};
pub use auxiliary::AuxParam;
pub use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    tensor::{backend::Backend, Tensor, TensorData},
};
pub use nerf::*;
pub use query::*;

/// A batched capability mapping points and view directions
/// to raw densities and colours.
///
/// It should be deterministic given identical parameters and inputs.
pub trait RadianceField<B: Backend> {
    /// The colour channel count `C`.
    fn color_channels(&self) -> usize;

    /// Evaluates the field once.
    ///
    /// ## Shapes
    ///
    /// * `points` - `[N, 3]`
    /// * `view_dirs` - `[N, 3]` (normalized)
    /// * output - `[N, C + 1]`, raw colours first and raw density last
    fn query(
        &self,
        points: Tensor<B, 2>,
        view_dirs: Tensor<B, 2>,
        aux: &AuxParam,
    ) -> Result<Tensor<B, 2>, Error>;
}

impl<B: Backend, F: RadianceField<B> + ?Sized> RadianceField<B> for &F {
    #[inline]
    fn color_channels(&self) -> usize {
        (**self).color_channels()
    }

    #[inline]
    fn query(
        &self,
        points: Tensor<B, 2>,
        view_dirs: Tensor<B, 2>,
        aux: &AuxParam,
    ) -> Result<Tensor<B, 2>, Error> {
        (**self).query(points, view_dirs, aux)
    }
}
