//! Blender synthetic dataset.

pub use super::*;

use crate::render::spiral_path;
use image::imageops::{self, FilterType};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{fs, io, path::Path};

/// Splits in loading order.
pub const SPLITS: [&str; 3] = ["train", "val", "test"];

#[derive(Debug, Deserialize)]
struct Transforms {
    camera_angle_x: f64,
    frames: Vec<TransformFrame>,
}

#[derive(Debug, Deserialize)]
struct TransformFrame {
    file_path: String,
    transform_matrix: [[f64; 4]; 4],
    #[serde(flatten)]
    extras: Map<String, Value>,
}

/// Loads `transforms_{train,val,test}.json` and the images they list.
///
/// A missing validation or test split is empty.
pub fn load(config: &DatasetConfig) -> Result<Dataset, Error> {
    let data_dir = Path::new(&config.data_dir);
    let mut dataset = Dataset {
        near: config.near,
        far: config.far,
        render_poses: spiral_path(crate::render::SPIRAL_FRAME_COUNT),
        ..Default::default()
    };
    let mut camera_angle_x = None;
    let mut image_size = None;

    for split in SPLITS {
        let path = data_dir.join(format!("transforms_{split}.json"));
        let transforms = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<Transforms>(&text)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound && split != "train" => {
                log::warn!(target: "auxnerf::dataset", "load > {path:?} is missing");
                continue;
            },
            Err(err) => return Err(err.into()),
        };
        camera_angle_x.get_or_insert(transforms.camera_angle_x);

        let skip = match split {
            "train" => 1,
            _ => config.testskip.max(1),
        };
        for (index, frame) in transforms.frames.iter().enumerate().step_by(skip) {
            let image = load_image(
                &data_dir.join(format!("{}.png", frame.file_path)),
                config.half_res,
                config.white_bkgd,
            )?;
            let size = (image.image_height, image.image_width);
            let size_expected = *image_size.get_or_insert(size);
            if size_expected != size {
                return Err(Error::validation(
                    format!("{split} frame {index} image size"),
                    format!("{size_expected:?}, not {size:?}"),
                ));
            }

            let aux = if config.use_aux_params {
                aux_param(frame, &config.aux_key)
                    .ok_or_else(|| {
                        Error::validation(
                            format!("{split} frame {index} {:?}", config.aux_key),
                            "a number or an array of numbers",
                        )
                    })?
            } else {
                AuxParam::Absent
            };

            let view_index = dataset.images.len();
            match split {
                "train" => dataset.split.train.push(view_index),
                "val" => dataset.split.val.push(view_index),
                _ => dataset.split.test.push(view_index),
            }
            dataset.images.push(image);
            dataset.poses.push(Pose::from_matrix(&frame.transform_matrix));
            dataset.aux_params.push(aux);
        }
    }

    let (image_height, image_width) = image_size
        .ok_or_else(|| Error::validation("the training split", "non-empty"))?;
    let camera_angle_x = camera_angle_x.unwrap_or_default();
    let focal = 0.5 * image_width as f64 / (0.5 * camera_angle_x).tan();
    dataset.camera_angle_x = camera_angle_x;
    dataset.intrinsics = Intrinsics::new(image_height, image_width, focal);

    log::info!(
        target: "auxnerf::dataset",
        "load > {} views ({} train, {} val, {} test) of {image_width}x{image_height} \
         from {data_dir:?}",
        dataset.images.len(),
        dataset.split.train.len(),
        dataset.split.val.len(),
        dataset.split.test.len(),
    );

    Ok(dataset)
}

fn aux_param(
    frame: &TransformFrame,
    key: &str,
) -> Option<AuxParam> {
    let values = match frame.extras.get(key)? {
        Value::Number(value) => vec![value.as_f64()? as f32],
        Value::Array(values) => values
            .iter()
            .map(|value| value.as_f64().map(|value| value as f32))
            .collect::<Option<Vec<_>>>()?,
        _ => return None,
    };
    (!values.is_empty()).then_some(AuxParam::Present(values))
}

/// Reads an RGBA image, halves it if requested, then composites or drops the alpha.
fn load_image(
    path: &Path,
    half_res: bool,
    white_bkgd: bool,
) -> Result<Frame, Error> {
    let mut image = image::open(path)?.to_rgba32f();
    if half_res {
        image = imageops::resize(
            &image,
            image.width() / 2,
            image.height() / 2,
            FilterType::Triangle,
        );
    }

    let values = image
        .pixels()
        .flat_map(|pixel| {
            let [r, g, b, a] = pixel.0;
            if white_bkgd {
                [r * a + (1.0 - a), g * a + (1.0 - a), b * a + (1.0 - a)]
            } else {
                [r, g, b]
            }
        })
        .collect();

    Frame::new(image.height(), image.width(), values)
}
