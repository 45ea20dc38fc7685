//! Radiance field property implementation.

pub use super::*;

use humansize::{format_size, BINARY};

/// Attribute getters
impl<B: Backend> NeRF<B> {
    /// Size of the parameters in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.num_params() * size_of::<B::FloatElem>()
    }

    /// Readable size of the parameters.
    #[inline]
    pub fn size_readable(&self) -> String {
        format_size(self.size(), BINARY.decimal_places(1))
    }
}

/// Attribute getters
impl<B: Backend> NerfModel<B> {
    /// Size of the parameters in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.num_params() * size_of::<B::FloatElem>()
    }

    /// Readable size of the parameters.
    #[inline]
    pub fn size_readable(&self) -> String {
        format_size(self.size(), BINARY.decimal_places(1))
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn size() {
        use super::*;
        use crate::backend::NdArray;

        let device = &Default::default();
        let field = NerfConfig::new()
            .with_depth(1)
            .with_width(4)
            .with_position_frequencies(0)
            .with_direction_frequencies(0)
            .init::<NdArray>(device);

        // trunk (3 -> 4), density (4 -> 1), feature (4 -> 4),
        // view (4 + 3 -> 2), color (2 -> 3)
        let param_count = (3 * 4 + 4) + (4 + 1) + (4 * 4 + 4) + (7 * 2 + 2) + (2 * 3 + 3);
        assert_eq!(field.num_params(), param_count);
        assert_eq!(field.size(), param_count * 4);
        assert_eq!(field.size_readable(), "264 B");
    }
}
