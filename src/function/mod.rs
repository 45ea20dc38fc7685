pub mod metric;
pub mod tensor_extensions;

pub use metric::*;
pub use tensor_extensions::*;
