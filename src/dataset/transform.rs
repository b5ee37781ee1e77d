//! Face preprocessing: grayscale, fixed 48x48 size, histogram equalization,
//! optional horizontal flip, and conversion to `[0, 1]` floats.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};

use crate::IMAGE_SIZE;

/// Convert to 8-bit luma, resize to `IMAGE_SIZE` if needed, then equalize
pub fn preprocess_face(img: &DynamicImage) -> GrayImage {
    let gray = img.to_luma8();
    let size = IMAGE_SIZE as u32;

    let gray = if gray.dimensions() == (size, size) {
        gray
    } else {
        imageops::resize(&gray, size, size, FilterType::Triangle)
    };

    equalize_histogram(&gray)
}

/// Histogram equalization through a cumulative lookup table.
///
/// Images with a single grey level, or too few pixels outside the
/// brightest level to fill the output range, are returned unchanged.
pub fn equalize_histogram(img: &GrayImage) -> GrayImage {
    let mut hist = [0usize; 256];
    for p in img.pixels() {
        hist[p.0[0] as usize] += 1;
    }

    let nonzero: Vec<usize> = hist.iter().copied().filter(|&h| h > 0).collect();
    if nonzero.len() <= 1 {
        return img.clone();
    }

    let total: usize = nonzero.iter().sum();
    let last = nonzero[nonzero.len() - 1];
    let step = (total - last) / 255;
    if step == 0 {
        return img.clone();
    }

    let mut lut = [0u8; 256];
    let mut n = step / 2;
    for (i, &h) in hist.iter().enumerate() {
        lut[i] = (n / step).min(255) as u8;
        n += h;
    }

    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
    out
}

/// Mirror left-right
pub fn flip_horizontal(img: &GrayImage) -> GrayImage {
    imageops::flip_horizontal(img)
}

/// Row-major `[0, 1]` floats, one channel
pub fn to_unit_floats(img: &GrayImage) -> Vec<f32> {
    img.pixels().map(|p| p.0[0] as f32 / 255.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbImage, Rgb};

    #[test]
    fn test_constant_image_unchanged() {
        let img = GrayImage::from_pixel(48, 48, Luma([90u8]));
        assert_eq!(equalize_histogram(&img), img);
    }

    #[test]
    fn test_two_levels_stretch_to_full_range() {
        // 300 dark pixels and 300 bright pixels
        let img = GrayImage::from_fn(30, 20, |x, _| if x < 15 { Luma([10u8]) } else { Luma([200u8]) });

        let eq = equalize_histogram(&img);

        assert_eq!(eq.get_pixel(0, 0).0[0], 0);
        assert_eq!(eq.get_pixel(29, 19).0[0], 255);
    }

    #[test]
    fn test_equalize_is_monotonic() {
        let img = GrayImage::from_fn(48, 48, |x, y| Luma([((x + y) % 64 + 40) as u8]));
        let eq = equalize_histogram(&img);

        let mut mapping = [None::<u8>; 256];
        for (src, dst) in img.pixels().zip(eq.pixels()) {
            mapping[src.0[0] as usize] = Some(dst.0[0]);
        }
        let outputs: Vec<u8> = mapping.iter().flatten().copied().collect();

        assert!(outputs.windows(2).all(|w| w[0] <= w[1]));
        assert!(*outputs.last().unwrap() > 200);
    }

    #[test]
    fn test_preprocess_resizes_color_input() {
        let rgb = RgbImage::from_pixel(96, 64, Rgb([200, 30, 30]));
        let face = preprocess_face(&DynamicImage::ImageRgb8(rgb));
        assert_eq!(face.dimensions(), (IMAGE_SIZE as u32, IMAGE_SIZE as u32));
    }

    #[test]
    fn test_flip_and_floats() {
        let img = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0u8 } else { 255u8 }]));
        let flipped = flip_horizontal(&img);

        assert_eq!(to_unit_floats(&img), vec![0.0, 1.0]);
        assert_eq!(to_unit_floats(&flipped), vec![1.0, 0.0]);
    }
}
