use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use ndarray::Array4;

/// MoveNet用の入力サイズ
pub const MOVENET_INPUT_SIZE: u32 = 192;

/// JPEG を MoveNet 用の入力テンソルに変換
///
/// - デコードして RGB
/// - 192x192 にリサイズ（アスペクト比は保たない）
/// - [1, 192, 192, 3] の f32 テンソル (0.0-255.0)
pub fn preprocess_jpeg(jpeg: &[u8]) -> Result<Array4<f32>> {
    let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .context("Failed to decode JPEG frame")?
        .to_rgb8();
    let resized = image::imageops::resize(&image, MOVENET_INPUT_SIZE, MOVENET_INPUT_SIZE, FilterType::Triangle);
    Ok(rgb_to_tensor(&resized))
}

/// RGB 画像を [1, H, W, 3] に並べる
pub fn rgb_to_tensor(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, height as usize, width as usize, 3));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32;
        }
    }
    tensor
}
