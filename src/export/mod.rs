//! Rendered images and videos.

pub use crate::error::Error;

use image::{
    codecs::gif::{GifEncoder, Repeat},
    Delay, Rgb, RgbImage, Rgba, RgbaImage,
};
use std::{fs, io, path::Path};

/// Frame rate of the videos.
pub const VIDEO_FPS: u32 = 30;

/// A host RGB image with values in `[0, 1]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub image_height: u32,
    pub image_width: u32,
    /// `[H, W, 3]` in row-major order.
    pub values: Vec<f32>,
}

impl Frame {
    pub fn new(
        image_height: u32,
        image_width: u32,
        values: Vec<f32>,
    ) -> Result<Self, Error> {
        let expected = image_height as usize * image_width as usize * 3;
        if values.len() != expected {
            return Err(Error::validation(
                "Frame::values::len",
                format!("{expected}, not {}", values.len()),
            ));
        }
        Ok(Self {
            image_height,
            image_width,
            values,
        })
    }

    /// Repeats single-channel values over three channels.
    pub fn from_gray(
        image_height: u32,
        image_width: u32,
        values: &[f32],
    ) -> Result<Self, Error> {
        Self::new(
            image_height,
            image_width,
            values.iter().flat_map(|v| [*v; 3]).collect(),
        )
    }

    #[inline]
    pub fn to_rgb8(&self) -> RgbImage {
        RgbImage::from_fn(self.image_width, self.image_height, |x, y| {
            let index = (y as usize * self.image_width as usize + x as usize) * 3;
            Rgb([
                to8b(self.values[index]),
                to8b(self.values[index + 1]),
                to8b(self.values[index + 2]),
            ])
        })
    }

    /// Writes the frame as PNG.
    pub fn save_png(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<(), Error> {
        Ok(self.to_rgb8().save(path)?)
    }
}

/// `clamp(value, 0, 1) * 255`, truncated.
#[inline]
pub fn to8b(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0) as u8
}

/// Normalizes disparity maps by their common maximum.
pub fn disparity_frames(
    image_height: u32,
    image_width: u32,
    disparities: &[Vec<f32>],
) -> Result<Vec<Frame>, Error> {
    let max = disparities
        .iter()
        .flatten()
        .copied()
        .filter(|d| d.is_finite())
        .fold(f32::EPSILON, f32::max);

    disparities
        .iter()
        .map(|disparities| {
            let values = disparities.iter().map(|d| d / max).collect::<Vec<_>>();
            Frame::from_gray(image_height, image_width, &values)
        })
        .collect()
}

/// Writes the frames as an endlessly looping GIF.
pub fn save_gif(
    frames: &[Frame],
    path: impl AsRef<Path>,
    fps: u32,
) -> Result<(), Error> {
    let file = io::BufWriter::new(fs::File::create(path)?);
    let mut encoder = GifEncoder::new_with_speed(file, 10);
    encoder.set_repeat(Repeat::Infinite)?;

    let delay = Delay::from_numer_denom_ms(1000, fps.max(1));
    let frames_gif = frames.iter().map(|frame| {
        let rgb = frame.to_rgb8();
        let rgba = RgbaImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let [r, g, b] = rgb.get_pixel(x, y).0;
            Rgba([r, g, b, 255])
        });
        image::Frame::from_parts(rgba, 0, 0, delay)
    });
    encoder.encode_frames(frames_gif)?;

    #[cfg(all(debug_assertions, not(test)))]
    log::debug!(target: "auxnerf::export", "save_gif > {} frames", frames.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("auxnerf-export-{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn to8b() {
        assert_eq!(super::to8b(-0.5), 0);
        assert_eq!(super::to8b(0.5), 127);
        assert_eq!(super::to8b(1.0), 255);
        assert_eq!(super::to8b(3.0), 255);
    }

    #[test]
    fn frame_size() {
        assert!(Frame::new(2, 3, vec![0.0; 18]).is_ok());
        assert!(matches!(
            Frame::new(2, 3, vec![0.0; 17]),
            Err(Error::Validation(..))
        ));
    }

    #[test]
    fn save_png_and_gif() {
        let dir = temp_dir("save_png_and_gif");

        let frames = (0..3)
            .map(|index| Frame::new(4, 5, vec![index as f32 / 2.0; 60]).unwrap())
            .collect::<Vec<_>>();
        frames[2].save_png(dir.join("002.png")).unwrap();
        save_gif(&frames, dir.join("rgb.gif"), VIDEO_FPS).unwrap();

        let image = image::open(dir.join("002.png")).unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (5, 4));
        assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255]);
        assert!(dir.join("rgb.gif").metadata().unwrap().len() > 0);
    }

    #[test]
    fn disparity_frames() {
        let frames = super::disparity_frames(1, 2, &[vec![1.0, 2.0], vec![4.0, 0.0]]).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].values, vec![0.25, 0.25, 0.25, 0.5, 0.5, 0.5]);
        assert_eq!(frames[1].values, vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
    }
}
