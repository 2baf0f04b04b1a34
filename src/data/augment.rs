use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{InputSize, IMG_MEAN};

/// Mean colour in RGB order; padding with it becomes zero after mean subtraction.
const PAD_PIXEL: Rgb<u8> = Rgb([123, 117, 104]);

/// Resize, random scale/crop and random mirror applied to an image/label pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Augmentation {
    pub crop: InputSize,
    pub mirror: bool,
    pub scale: bool,
    pub ignore_label: u8,
    pub seed: u64,
}

impl Augmentation {
    pub fn new(crop: InputSize) -> Self {
        Self {
            crop,
            mirror: false,
            scale: false,
            ignore_label: 0,
            seed: 0,
        }
    }

    /// Augments sample `index`. The random draws depend only on `(seed, index)`,
    /// never on which worker thread prepares the sample.
    pub fn apply(&self, image: &RgbImage, label: &GrayImage, index: usize) -> (RgbImage, GrayImage) {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(index as u64));
        let (crop_w, crop_h) = (self.crop.width as u32, self.crop.height as u32);

        let mut image = if image.dimensions() == (crop_w, crop_h) {
            image.clone()
        } else {
            imageops::resize(image, crop_w, crop_h, FilterType::Triangle)
        };
        let mut label = if label.dimensions() == (crop_w, crop_h) {
            label.clone()
        } else {
            imageops::resize(label, crop_w, crop_h, FilterType::Nearest)
        };

        if self.scale {
            let factor = 0.7 + rng.gen_range(0..11) as f32 / 10.0;
            let scaled_w = ((crop_w as f32 * factor) as u32).max(1);
            let scaled_h = ((crop_h as f32 * factor) as u32).max(1);
            let scaled_image = imageops::resize(&image, scaled_w, scaled_h, FilterType::Triangle);
            let scaled_label = imageops::resize(&label, scaled_w, scaled_h, FilterType::Nearest);

            let canvas_w = scaled_w.max(crop_w);
            let canvas_h = scaled_h.max(crop_h);
            let mut image_canvas = RgbImage::from_pixel(canvas_w, canvas_h, PAD_PIXEL);
            let mut label_canvas = GrayImage::from_pixel(canvas_w, canvas_h, Luma([self.ignore_label]));
            imageops::overlay(&mut image_canvas, &scaled_image, 0, 0);
            imageops::overlay(&mut label_canvas, &scaled_label, 0, 0);

            let x = rng.gen_range(0..=canvas_w - crop_w);
            let y = rng.gen_range(0..=canvas_h - crop_h);
            image = imageops::crop_imm(&image_canvas, x, y, crop_w, crop_h).to_image();
            label = imageops::crop_imm(&label_canvas, x, y, crop_w, crop_h).to_image();
        }

        if self.mirror && rng.gen_bool(0.5) {
            image = imageops::flip_horizontal(&image);
            label = imageops::flip_horizontal(&label);
        }

        (image, label)
    }
}

/// CHW floats in BGR channel order with [`IMG_MEAN`] subtracted.
pub fn image_to_chw(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        // RGB -> BGR
        for (channel, value) in [pixel[2], pixel[1], pixel[0]].into_iter().enumerate() {
            data[channel * plane + offset] = value as f32 - IMG_MEAN[channel];
        }
    }

    data
}

/// Single-plane label map scaled to `[0, 1]`.
pub fn label_to_plane(label: &GrayImage) -> Vec<f32> {
    label.pixels().map(|p| p[0] as f32 / 255.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_pair(width: u32, height: u32) -> (RgbImage, GrayImage) {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8 * 10, y as u8 * 10, 50]));
        let label = GrayImage::from_fn(width, height, |x, _| Luma([if x < width / 2 { 255 } else { 0 }]));
        (image, label)
    }

    #[test]
    fn output_matches_crop_size() {
        let (image, label) = gradient_pair(20, 12);
        let mut augmentation = Augmentation::new(InputSize::new(8, 16));
        augmentation.scale = true;
        augmentation.mirror = true;

        for index in 0..20 {
            let (image, label) = augmentation.apply(&image, &label, index);
            assert_eq!(image.dimensions(), (16, 8));
            assert_eq!(label.dimensions(), (16, 8));
        }
    }

    #[test]
    fn same_seed_and_index_give_same_sample() {
        let (image, label) = gradient_pair(16, 16);
        let mut augmentation = Augmentation::new(InputSize::new(16, 16));
        augmentation.scale = true;
        augmentation.mirror = true;
        augmentation.seed = 7;

        let first = augmentation.apply(&image, &label, 3);
        let second = augmentation.apply(&image, &label, 3);
        assert_eq!(first, second);
    }

    #[test]
    fn without_augmentation_only_resizes() {
        let (image, label) = gradient_pair(16, 16);
        let augmentation = Augmentation::new(InputSize::new(16, 16));
        let (out_image, out_label) = augmentation.apply(&image, &label, 0);
        assert_eq!(out_image, image);
        assert_eq!(out_label, label);
    }

    #[test]
    fn chw_conversion_subtracts_bgr_mean() {
        let image = RgbImage::from_pixel(2, 1, Rgb([200, 100, 50]));
        let data = image_to_chw(&image);
        assert_eq!(data.len(), 6);
        assert!((data[0] - (50.0 - IMG_MEAN[0])).abs() < 1e-4);
        assert!((data[2] - (100.0 - IMG_MEAN[1])).abs() < 1e-4);
        assert!((data[4] - (200.0 - IMG_MEAN[2])).abs() < 1e-4);

        let label = GrayImage::from_pixel(2, 1, Luma([255]));
        assert_eq!(label_to_plane(&label), vec![1.0, 1.0]);
    }
}
