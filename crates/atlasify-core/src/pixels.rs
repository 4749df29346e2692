//! Pixel-buffer service: decode, resize, alpha trim, layer composition and
//! encoding. The pipeline only talks to the [`PixelService`] trait;
//! [`ImageService`] implements it on top of the `image` crate.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageError, ImageReader, Rgba, RgbaImage};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::{FormatConfig, OutputFormat, PngCompression};
use crate::error::{AtlasError, Result};
use crate::model::Rect;

/// Dimensions reported by [`PixelService::metadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

/// Result of an alpha bounding-box trim.
#[derive(Debug, Clone)]
pub struct TrimResult {
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
    pub buffer: RgbaImage,
}

/// One image to draw onto the atlas canvas.
#[derive(Debug, Clone)]
pub struct Layer {
    pub buffer: Arc<RgbaImage>,
    pub left: i64,
    pub top: i64,
    /// Draw the buffer rotated 90° clockwise.
    pub rotated: bool,
}

/// Contract of the pixel-buffer collaborator.
pub trait PixelService: Sync {
    fn metadata(&self, path: &Path) -> Result<ImageInfo>;
    fn decode(&self, path: &Path) -> Result<RgbaImage>;
    fn resize(&self, buffer: &RgbaImage, width: u32, height: u32) -> RgbaImage;
    fn trim(&self, buffer: &RgbaImage, alpha_threshold: u8) -> TrimResult;
    /// Draws `layers` in order onto a transparent `width x height` canvas.
    fn composite_onto(&self, width: u32, height: u32, layers: &[Layer]) -> RgbaImage;
    fn encode(&self, buffer: &RgbaImage, format: OutputFormat, options: &FormatConfig) -> Result<Vec<u8>>;
}

/// [`PixelService`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageService;

fn sprite_error(path: &Path, source: ImageError) -> AtlasError {
    AtlasError::SpriteRead {
        path: path.to_path_buf(),
        source,
    }
}

impl PixelService for ImageService {
    fn metadata(&self, path: &Path) -> Result<ImageInfo> {
        let (width, height) = image::image_dimensions(path).map_err(|e| sprite_error(path, e))?;
        Ok(ImageInfo { width, height })
    }

    fn decode(&self, path: &Path) -> Result<RgbaImage> {
        let img = ImageReader::open(path)
            .map_err(|e| sprite_error(path, ImageError::IoError(e)))?
            .with_guessed_format()
            .map_err(|e| sprite_error(path, ImageError::IoError(e)))?
            .decode()
            .map_err(|e| sprite_error(path, e))?;
        Ok(img.to_rgba8())
    }

    fn resize(&self, buffer: &RgbaImage, width: u32, height: u32) -> RgbaImage {
        imageops::resize(buffer, width, height, FilterType::Lanczos3)
    }

    fn trim(&self, buffer: &RgbaImage, alpha_threshold: u8) -> TrimResult {
        let bounds = compute_trim_rect(buffer, alpha_threshold);
        let (w, h) = buffer.dimensions();
        match bounds {
            Some(r) if r.w != w || r.h != h => TrimResult {
                offset_x: r.x,
                offset_y: r.y,
                width: r.w,
                height: r.h,
                buffer: imageops::crop_imm(buffer, r.x, r.y, r.w, r.h).to_image(),
            },
            // Nothing to cut, or nothing visible at all: keep the full bounds.
            _ => TrimResult {
                offset_x: 0,
                offset_y: 0,
                width: w,
                height: h,
                buffer: buffer.clone(),
            },
        }
    }

    fn composite_onto(&self, width: u32, height: u32, layers: &[Layer]) -> RgbaImage {
        let mut canvas = RgbaImage::new(width, height);
        let mut rotated_cache: HashMap<*const RgbaImage, RgbaImage> = HashMap::new();
        for layer in layers {
            if layer.rotated {
                let key = Arc::as_ptr(&layer.buffer);
                let src = rotated_cache
                    .entry(key)
                    .or_insert_with(|| imageops::rotate90(layer.buffer.as_ref()));
                blend_layer(src, &mut canvas, layer.left, layer.top);
            } else {
                blend_layer(&layer.buffer, &mut canvas, layer.left, layer.top);
            }
        }
        canvas
    }

    fn encode(&self, buffer: &RgbaImage, format: OutputFormat, options: &FormatConfig) -> Result<Vec<u8>> {
        let (w, h) = buffer.dimensions();
        let mut out = Vec::new();
        match format {
            OutputFormat::Png => {
                let compression = match options.png.compression {
                    PngCompression::Fast => CompressionType::Fast,
                    PngCompression::Default => CompressionType::Default,
                    PngCompression::Best => CompressionType::Best,
                };
                PngEncoder::new_with_quality(&mut out, compression, PngFilter::Adaptive)
                    .write_image(buffer.as_raw(), w, h, ExtendedColorType::Rgba8)?;
            }
            OutputFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgba8(buffer.clone()).to_rgb8();
                JpegEncoder::new_with_quality(&mut out, options.jpeg.quality).write_image(
                    rgb.as_raw(),
                    w,
                    h,
                    ExtendedColorType::Rgb8,
                )?;
            }
            OutputFormat::Webp => {
                WebPEncoder::new_lossless(&mut out).write_image(
                    buffer.as_raw(),
                    w,
                    h,
                    ExtendedColorType::Rgba8,
                )?;
            }
            OutputFormat::Avif => encode_avif(&mut out, buffer, options)?,
        }
        Ok(out)
    }
}

#[cfg(feature = "avif")]
fn encode_avif(out: &mut Vec<u8>, buffer: &RgbaImage, options: &FormatConfig) -> Result<()> {
    use image::codecs::avif::AvifEncoder;
    let (w, h) = buffer.dimensions();
    AvifEncoder::new_with_speed_quality(out, options.avif.speed, options.avif.quality).write_image(
        buffer.as_raw(),
        w,
        h,
        ExtendedColorType::Rgba8,
    )?;
    Ok(())
}

#[cfg(not(feature = "avif"))]
fn encode_avif(_out: &mut Vec<u8>, _buffer: &RgbaImage, _options: &FormatConfig) -> Result<()> {
    Err(AtlasError::Encode(
        "avif output requires the `avif` feature".into(),
    ))
}

/// Bounding box of pixels with alpha above `threshold`, or `None` when the
/// image has no such pixel.
pub fn compute_trim_rect(rgba: &RgbaImage, threshold: u8) -> Option<Rect> {
    let (w, h) = rgba.dimensions();
    let opaque_col = |x: u32, y0: u32, y1: u32| (y0..=y1).any(|y| rgba.get_pixel(x, y)[3] > threshold);
    let opaque_row = |y: u32, x0: u32, x1: u32| (x0..=x1).any(|x| rgba.get_pixel(x, y)[3] > threshold);
    if w == 0 || h == 0 {
        return None;
    }
    // left
    let mut x1 = 0;
    while x1 < w && !opaque_col(x1, 0, h - 1) {
        x1 += 1;
    }
    if x1 >= w {
        return None;
    }
    // right
    let mut x2 = w - 1;
    while x2 > x1 && !opaque_col(x2, 0, h - 1) {
        x2 -= 1;
    }
    // top
    let mut y1 = 0;
    while y1 < h && !opaque_row(y1, x1, x2) {
        y1 += 1;
    }
    // bottom
    let mut y2 = h - 1;
    while y2 > y1 && !opaque_row(y2, x1, x2) {
        y2 -= 1;
    }
    Some(Rect::new(x1, y1, x2 - x1 + 1, y2 - y1 + 1))
}

/// Alpha-blends `src` over `canvas` with its top-left corner at (left, top);
/// pixels falling outside the canvas are dropped.
pub fn blend_layer(src: &RgbaImage, canvas: &mut RgbaImage, left: i64, top: i64) {
    let (cw, ch) = canvas.dimensions();
    let (sw, sh) = src.dimensions();
    for yy in 0..sh {
        let dy = top + yy as i64;
        if dy < 0 || dy >= ch as i64 {
            continue;
        }
        for xx in 0..sw {
            let dx = left + xx as i64;
            if dx < 0 || dx >= cw as i64 {
                continue;
            }
            let px = *src.get_pixel(xx, yy);
            blend_over(canvas.get_pixel_mut(dx as u32, dy as u32), px);
        }
    }
}

fn blend_over(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let sa = src[3] as u32;
    if sa == 0 {
        return;
    }
    let da = dst[3] as u32;
    if sa == 255 || da == 0 {
        *dst = src;
        return;
    }
    let keep = da * (255 - sa) / 255;
    let out_a = sa + keep;
    for c in 0..3 {
        let v = (src[c] as u32 * sa + dst[c] as u32 * keep) / out_a;
        dst[c] = v.min(255) as u8;
    }
    dst[3] = out_a.min(255) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprite_with_dot(w: u32, h: u32, x: u32, y: u32) -> RgbaImage {
        let mut img = RgbaImage::new(w, h);
        img.put_pixel(x, y, Rgba([10, 20, 30, 255]));
        img
    }

    #[test]
    fn trim_finds_alpha_bounds() {
        let mut img = sprite_with_dot(10, 8, 2, 3);
        img.put_pixel(5, 6, Rgba([1, 1, 1, 200]));
        let t = ImageService.trim(&img, 0);
        assert_eq!((t.offset_x, t.offset_y, t.width, t.height), (2, 3, 4, 4));
        assert_eq!(t.buffer.dimensions(), (4, 4));
        assert_eq!(t.buffer.get_pixel(0, 0)[3], 255);
    }

    #[test]
    fn trim_respects_threshold() {
        let mut img = sprite_with_dot(6, 6, 1, 1);
        img.put_pixel(4, 4, Rgba([0, 0, 0, 5]));
        let t = ImageService.trim(&img, 10);
        assert_eq!((t.offset_x, t.offset_y, t.width, t.height), (1, 1, 1, 1));
    }

    #[test]
    fn fully_transparent_keeps_full_bounds() {
        let img = RgbaImage::new(7, 5);
        let t = ImageService.trim(&img, 0);
        assert_eq!((t.offset_x, t.offset_y, t.width, t.height), (0, 0, 7, 5));
    }

    #[test]
    fn composite_rotates_clockwise() {
        // 2x1 source: red then green
        let mut src = RgbaImage::new(2, 1);
        src.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        src.put_pixel(1, 0, Rgba([0, 255, 0, 255]));
        let layer = Layer {
            buffer: Arc::new(src),
            left: 0,
            top: 0,
            rotated: true,
        };
        let out = ImageService.composite_onto(1, 2, &[layer]);
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(0, 1).0, [0, 255, 0, 255]);
    }

    #[test]
    fn later_layers_win() {
        let a = Arc::new(RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255])));
        let b = Arc::new(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 255, 255])));
        let layers = [
            Layer { buffer: a, left: 0, top: 0, rotated: false },
            Layer { buffer: b, left: 1, top: 1, rotated: false },
        ];
        let out = ImageService.composite_onto(3, 3, &layers);
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(1, 1).0, [0, 0, 255, 255]);
        assert_eq!(out.get_pixel(2, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn png_roundtrips_through_decoder() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([9, 8, 7, 255]));
        let bytes = ImageService
            .encode(&img, OutputFormat::Png, &FormatConfig::default())
            .unwrap();
        let back = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(back, img);

        let path = std::env::temp_dir().join(format!("atlasify_pixels_{}.png", std::process::id()));
        std::fs::write(&path, &bytes).unwrap();
        let info = ImageService.metadata(&path).unwrap();
        assert_eq!((info.width, info.height), (3, 2));
        assert_eq!(ImageService.decode(&path).unwrap(), img);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unreadable_sprite_names_its_path() {
        let path = Path::new("definitely/not/here.png");
        match ImageService.decode(path) {
            Err(AtlasError::SpriteRead { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {other:?}"),
        }
    }
}
