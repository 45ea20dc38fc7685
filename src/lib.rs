#![allow(missing_docs)]

pub mod backend;
pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod export;
pub mod function;
pub mod render;
pub mod scene;
pub mod train;
