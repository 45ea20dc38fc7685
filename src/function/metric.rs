//! Image metrics.

/// Mean squared error between two equally sized buffers.
pub fn mse(
    output: &[f32],
    target: &[f32],
) -> f64 {
    assert_eq!(output.len(), target.len(), "output and target should match");
    if output.is_empty() {
        return 0.0;
    }

    let sum = output
        .iter()
        .zip(target)
        .map(|(o, t)| {
            let diff = (*o - *t) as f64;
            diff * diff
        })
        .sum::<f64>();
    sum / output.len() as f64
}

/// Peak signal-to-noise ratio of unit-range values, `-10 * log10(mse)`.
#[inline]
pub fn mse_to_psnr(mse: f64) -> f64 {
    -10.0 * mse.log10()
}

#[inline]
pub fn psnr(
    output: &[f32],
    target: &[f32],
) -> f64 {
    mse_to_psnr(mse(output, target))
}
