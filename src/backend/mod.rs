pub use burn::{
    backend::wgpu::WgpuDevice,
    tensor::backend::{AutodiffBackend, Backend},
};

use burn::backend::autodiff;

pub type Autodiff<B> = autodiff::Autodiff<B>;
pub type NdArray = burn::backend::NdArray<f32>;
pub type Wgpu = burn::backend::Wgpu<f32, i32>;
