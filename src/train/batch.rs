//! Ray batch selection.

pub use crate::{error::Error, export::Frame};

use rand::{seq::index, Rng};

/// Flat pixel indices rays are drawn from at `iteration`.
///
/// Before `precrop_iters`, it is the centred crop spanning `precrop_frac`
/// of each side, otherwise the whole image.
pub fn active_pixels(
    image_height: u32,
    image_width: u32,
    iteration: u64,
    precrop_iters: u64,
    precrop_frac: f64,
) -> Vec<usize> {
    let height = image_height as usize;
    let width = image_width as usize;

    if iteration < precrop_iters {
        if let Some((rows, cols)) = crop_ranges(height, width, precrop_frac) {
            return rows
                .flat_map(|row| cols.to_owned().map(move |col| row * width + col))
                .collect();
        }
    }

    (0..height * width).collect()
}

/// Rows and columns of the centred crop, `None` if it is empty.
pub fn crop_ranges(
    height: usize,
    width: usize,
    precrop_frac: f64,
) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
    let dh = ((height / 2) as f64 * precrop_frac) as usize;
    let dw = ((width / 2) as f64 * precrop_frac) as usize;
    if dh == 0 || dw == 0 {
        return None;
    }
    Some((
        height / 2 - dh..height / 2 + dh,
        width / 2 - dw..width / 2 + dw,
    ))
}

/// Chooses `count` distinct pixels uniformly.
pub fn select_pixels(
    active: &[usize],
    count: usize,
    rng: &mut impl Rng,
) -> Result<Vec<usize>, Error> {
    if count > active.len() {
        return Err(Error::validation(
            "NerfTrainerConfig::n_rand",
            format!("at most the active pixel count {}", active.len()),
        ));
    }
    Ok(index::sample(rng, active.len(), count)
        .into_iter()
        .map(|i| active[i])
        .collect())
}

/// Colours of the pixels at `indices`.
///
/// ## Shapes
///
/// * output - `[N, 3]` in row-major order
pub fn gather_colors(
    frame: &Frame,
    indices: &[usize],
) -> Vec<f32> {
    indices
        .iter()
        .flat_map(|&index| frame.values[index * 3..index * 3 + 3].iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn active_pixels_crop() {
        // 8x6 image, half crop: rows 2..6, columns 2..4
        let pixels = active_pixels(8, 6, 0, 10, 0.5);
        assert_eq!(pixels.len(), 4 * 2);
        assert_eq!(pixels[0], 2 * 6 + 2);
        assert_eq!(pixels[7], 5 * 6 + 3);

        // After the warm-up
        assert_eq!(active_pixels(8, 6, 10, 10, 0.5).len(), 48);

        // Too small to crop
        assert_eq!(active_pixels(2, 2, 0, 10, 0.4).len(), 4);
    }

    #[test]
    fn select_pixels_without_replacement() {
        let mut rng = StdRng::seed_from_u64(0);
        let active = (100..164).collect::<Vec<_>>();

        let mut selected = select_pixels(&active, 64, &mut rng).unwrap();
        selected.sort_unstable();
        assert_eq!(selected, active);

        let selected = select_pixels(&active, 10, &mut rng).unwrap();
        assert_eq!(selected.len(), 10);
        assert!(selected.iter().all(|i| active.contains(i)));

        assert!(select_pixels(&active, 65, &mut rng).is_err());
    }

    #[test]
    fn gather_colors() {
        let frame = Frame::new(1, 3, vec![0.0, 0.1, 0.2, 1.0, 1.1, 1.2, 2.0, 2.1, 2.2]).unwrap();
        assert_eq!(
            super::gather_colors(&frame, &[2, 0]),
            vec![2.0, 2.1, 2.2, 0.0, 0.1, 0.2]
        );
    }
}
