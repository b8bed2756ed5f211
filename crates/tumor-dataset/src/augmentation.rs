//! Random geometric augmentation and tensor conversion.
//!
//! The training stream draws one [`AffineParams`] per image: a rotation in
//! ±`rotation_range` degrees and independent row/column zoom factors in
//! `[1 - zoom_range, 1 + zoom_range]`, composed into a single affine map
//! about the image centre, followed by an optional horizontal flip.
//! Sampling is bilinear and out-of-image coordinates take the nearest edge
//! pixel. Output is a rescaled CHW float buffer, never re-quantized to u8.

use image::RgbImage;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tumor_core::AugmentationConfig;

/// Transform drawn for a single image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    pub theta_degrees: f32,
    pub zoom_row: f32,
    pub zoom_col: f32,
    pub flip_horizontal: bool,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            theta_degrees: 0.0,
            zoom_row: 1.0,
            zoom_col: 1.0,
            flip_horizontal: false,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.theta_degrees == 0.0
            && self.zoom_row == 1.0
            && self.zoom_col == 1.0
            && !self.flip_horizontal
    }
}

/// Applies configured augmentation and rescaling
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Draws transform parameters. Disabled components stay at identity.
    pub fn sample_params(&self, rng: &mut ChaCha8Rng) -> AffineParams {
        let mut params = AffineParams::identity();

        let range = self.config.rotation_range;
        if range > 0.0 {
            params.theta_degrees = rng.gen_range(-range..=range);
        }

        let zoom = self.config.zoom_range;
        if zoom > 0.0 {
            params.zoom_row = rng.gen_range(1.0 - zoom..=1.0 + zoom);
            params.zoom_col = rng.gen_range(1.0 - zoom..=1.0 + zoom);
        }

        if self.config.horizontal_flip {
            params.flip_horizontal = rng.gen::<f32>() < 0.5;
        }

        params
    }

    /// Augments (when configured) and converts an image to a CHW buffer
    pub fn process(&self, img: &RgbImage, rng: Option<&mut ChaCha8Rng>) -> Vec<f32> {
        let params = match rng {
            Some(rng) if !self.config.is_identity() => self.sample_params(rng),
            _ => AffineParams::identity(),
        };
        self.apply(img, &params)
    }

    /// Applies a fixed transform and rescales into a CHW buffer
    pub fn apply(&self, img: &RgbImage, params: &AffineParams) -> Vec<f32> {
        if params.is_identity() {
            return to_chw(img, self.config.rescale);
        }

        let (width, height) = img.dimensions();
        let (w, h) = (width as usize, height as usize);
        let plane = w * h;
        let mut out = vec![0.0f32; 3 * plane];

        let theta = params.theta_degrees.to_radians();
        let (sin_t, cos_t) = theta.sin_cos();
        // Output (row, col) -> input (row, col): R(theta) * Z(zoom_row, zoom_col)
        let m00 = cos_t * params.zoom_row;
        let m01 = -sin_t * params.zoom_col;
        let m10 = sin_t * params.zoom_row;
        let m11 = cos_t * params.zoom_col;

        let center_row = (h as f32 - 1.0) / 2.0;
        let center_col = (w as f32 - 1.0) / 2.0;

        for row in 0..h {
            let dr = row as f32 - center_row;
            for col in 0..w {
                let src_col_out = if params.flip_horizontal { w - 1 - col } else { col };
                let dc = src_col_out as f32 - center_col;

                let src_row = center_row + m00 * dr + m01 * dc;
                let src_col = center_col + m10 * dr + m11 * dc;

                let rgb = bilinear_sample(img, src_row, src_col);
                let idx = row * w + col;
                for c in 0..3 {
                    out[c * plane + idx] = rgb[c] * self.config.rescale;
                }
            }
        }

        out
    }
}

/// Samples with edge clamping ("nearest" fill) and bilinear interpolation
fn bilinear_sample(img: &RgbImage, row: f32, col: f32) -> [f32; 3] {
    let (width, height) = img.dimensions();
    let row = row.clamp(0.0, (height - 1) as f32);
    let col = col.clamp(0.0, (width - 1) as f32);

    let r0 = row.floor() as u32;
    let c0 = col.floor() as u32;
    let r1 = (r0 + 1).min(height - 1);
    let c1 = (c0 + 1).min(width - 1);

    let fr = row - r0 as f32;
    let fc = col - c0 as f32;

    let p00 = img.get_pixel(c0, r0);
    let p01 = img.get_pixel(c1, r0);
    let p10 = img.get_pixel(c0, r1);
    let p11 = img.get_pixel(c1, r1);

    let mut result = [0.0f32; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fc) + p01[c] as f32 * fc;
        let bottom = p10[c] as f32 * (1.0 - fc) + p11[c] as f32 * fc;
        result[c] = top * (1.0 - fr) + bottom * fr;
    }
    result
}

/// Converts an RGB image to a rescaled CHW buffer
pub fn to_chw(img: &RgbImage, rescale: f32) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        data[idx] = pixel[0] as f32 * rescale;
        data[plane + idx] = pixel[1] as f32 * rescale;
        data[2 * plane + idx] = pixel[2] as f32 * rescale;
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use rand::SeedableRng;

    const RESCALE: f32 = 1.0 / 255.0;

    fn gradient(size: u32) -> RgbImage {
        ImageBuffer::from_fn(size, size, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 200]))
    }

    #[test]
    fn test_to_chw_layout_and_range() {
        let img = gradient(4);
        let data = to_chw(&img, RESCALE);
        assert_eq!(data.len(), 3 * 16);
        // red channel of pixel (x=3, y=0)
        assert!((data[3] - 30.0 / 255.0).abs() < 1e-6);
        // green channel of pixel (x=0, y=2)
        assert!((data[16 + 8] - 20.0 / 255.0).abs() < 1e-6);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_identity_matches_plain_conversion() {
        let img = gradient(6);
        let augmenter = Augmenter::new(AugmentationConfig::default());
        assert_eq!(augmenter.apply(&img, &AffineParams::identity()), to_chw(&img, RESCALE));
    }

    #[test]
    fn test_horizontal_flip_mirrors_columns() {
        let img = gradient(5);
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let params = AffineParams {
            flip_horizontal: true,
            ..AffineParams::identity()
        };
        let flipped = augmenter.apply(&img, &params);
        let plain = to_chw(&img, RESCALE);
        for row in 0..5 {
            for col in 0..5 {
                assert!((flipped[row * 5 + col] - plain[row * 5 + (4 - col)]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_constant_image_survives_transform() {
        let img: RgbImage = ImageBuffer::from_pixel(9, 9, Rgb([51, 102, 204]));
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let params = AffineParams {
            theta_degrees: 17.0,
            zoom_row: 1.2,
            zoom_col: 0.85,
            flip_horizontal: true,
        };
        let data = augmenter.apply(&img, &params);
        assert!(data[..81].iter().all(|v| (v - 0.2).abs() < 1e-5));
        assert!(data[162..].iter().all(|v| (v - 0.8).abs() < 1e-5));
    }

    #[test]
    fn test_sampled_params_within_ranges() {
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut flips = 0;
        for _ in 0..200 {
            let params = augmenter.sample_params(&mut rng);
            assert!(params.theta_degrees.abs() <= 20.0);
            assert!((0.8..=1.2).contains(&params.zoom_row));
            assert!((0.8..=1.2).contains(&params.zoom_col));
            flips += params.flip_horizontal as usize;
        }
        assert!(flips > 50 && flips < 150);
    }

    #[test]
    fn test_rescale_only_ignores_rng() {
        let img = gradient(4);
        let augmenter = Augmenter::new(AugmentationConfig::rescale_only(RESCALE));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(augmenter.process(&img, Some(&mut rng)), to_chw(&img, RESCALE));
    }

    #[test]
    fn test_same_seed_same_output() {
        let img = gradient(8);
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let a = augmenter.process(&img, Some(&mut ChaCha8Rng::seed_from_u64(3)));
        let b = augmenter.process(&img, Some(&mut ChaCha8Rng::seed_from_u64(3)));
        assert_eq!(a, b);
    }
}
