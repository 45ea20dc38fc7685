//! Chunked evaluation of sample sets.

pub use super::*;

/// Evaluates `field` at every sample of every ray, at most `chunk` rows per call.
///
/// The chunk size bounds the peak memory only, the output does not depend on it.
///
/// ## Shapes
///
/// * `points` - `[R, S, 3]`
/// * `view_dirs` - `[R, 3]`, shared by the samples of a ray
/// * `output` - `[R, S, C + 1]`
pub fn query_samples<B: Backend, F: RadianceField<B> + ?Sized>(
    field: &F,
    points: Tensor<B, 3>,
    view_dirs: Tensor<B, 2>,
    aux: &AuxParam,
    chunk: usize,
) -> Result<Tensor<B, 3>, Error> {
    if chunk == 0 {
        return Err(Error::validation("chunk", "greater than 0"));
    }

    let [ray_count, sample_count, _] = points.dims();
    let row_count = ray_count * sample_count;
    let channel_count = field.color_channels() + 1;
    let device = points.device();

    if row_count == 0 {
        return Ok(Tensor::zeros([ray_count, sample_count, channel_count], &device));
    }

    // [R * S, 3]
    let points = points.reshape([row_count, 3]);
    let view_dirs = view_dirs
        .unsqueeze_dim::<3>(1)
        .expand([ray_count, sample_count, 3])
        .reshape([row_count, 3]);

    let outputs = (0..row_count)
        .step_by(chunk)
        .map(|start| {
            let range = start..(start + chunk).min(row_count);
            let row_count_chunk = range.len();
            let output = field.query(
                points.to_owned().slice([range.to_owned()]),
                view_dirs.to_owned().slice([range]),
                aux,
            )?;

            let [row_count_output, channel_count_output] = output.dims();
            if channel_count_output != channel_count {
                return Err(Error::MismatchedChannelCount {
                    expected: channel_count,
                    found: channel_count_output,
                });
            }
            if row_count_output != row_count_chunk {
                return Err(Error::validation(
                    "RadianceField::query output rows",
                    format!("{row_count_chunk}, not {row_count_output}"),
                ));
            }

            Ok(output)
        })
        .collect::<Result<Vec<_>, Error>>()?;

    #[cfg(all(debug_assertions, not(test)))]
    log::debug!(
        target: "auxnerf::scene::query",
        "query_samples > {} chunks of {chunk} rows",
        outputs.len(),
    );

    Ok(Tensor::cat(outputs, 0).reshape([ray_count, sample_count, channel_count]))
}
