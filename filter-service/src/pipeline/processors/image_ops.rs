//! Built-in filters backed by the `image` crate.

use std::sync::Arc;

use image::{DynamicImage, Rgba};

use super::traits::{FilterFn, FnFilter};
use crate::domain::FilterKind;
use filter_pipeline::BoxError;

fn required(kind: FilterKind, value: Option<f64>) -> Result<f64, BoxError> {
    value.ok_or_else(|| format!("{kind} requires a value").into())
}

fn grayscale(image: DynamicImage, _: Option<f64>) -> Result<DynamicImage, BoxError> {
    Ok(image.grayscale())
}

fn sepia(image: DynamicImage, _: Option<f64>) -> Result<DynamicImage, BoxError> {
    let mut buf = image.into_rgba8();
    for Rgba([r, g, b, _]) in buf.pixels_mut() {
        let (fr, fg, fb) = (*r as f32, *g as f32, *b as f32);
        *r = (0.393 * fr + 0.769 * fg + 0.189 * fb).min(255.0) as u8;
        *g = (0.349 * fr + 0.686 * fg + 0.168 * fb).min(255.0) as u8;
        *b = (0.272 * fr + 0.534 * fg + 0.131 * fb).min(255.0) as u8;
    }
    Ok(DynamicImage::ImageRgba8(buf))
}

fn invert(mut image: DynamicImage, _: Option<f64>) -> Result<DynamicImage, BoxError> {
    image.invert();
    Ok(image)
}

fn blur(image: DynamicImage, value: Option<f64>) -> Result<DynamicImage, BoxError> {
    let sigma = required(FilterKind::Blur, value)?;
    Ok(image.blur(sigma as f32))
}

fn sharpen(image: DynamicImage, value: Option<f64>) -> Result<DynamicImage, BoxError> {
    let sigma = required(FilterKind::Sharpen, value)?;
    Ok(image.unsharpen(sigma as f32, 1))
}

fn brightness(image: DynamicImage, value: Option<f64>) -> Result<DynamicImage, BoxError> {
    let delta = required(FilterKind::Brightness, value)?;
    Ok(image.brighten(delta as i32))
}

fn contrast(image: DynamicImage, value: Option<f64>) -> Result<DynamicImage, BoxError> {
    let percent = required(FilterKind::Contrast, value)?;
    Ok(image.adjust_contrast(percent as f32))
}

fn hue_rotate(image: DynamicImage, value: Option<f64>) -> Result<DynamicImage, BoxError> {
    let degrees = required(FilterKind::HueRotate, value)?;
    Ok(image.huerotate(degrees.round() as i32))
}

fn rotate(image: DynamicImage, value: Option<f64>) -> Result<DynamicImage, BoxError> {
    let degrees = required(FilterKind::Rotate, value)?;
    match degrees as i32 {
        90 => Ok(image.rotate90()),
        180 => Ok(image.rotate180()),
        270 => Ok(image.rotate270()),
        other => Err(format!("rotate: unsupported angle {other}").into()),
    }
}

fn flip_horizontal(image: DynamicImage, _: Option<f64>) -> Result<DynamicImage, BoxError> {
    Ok(image.fliph())
}

fn flip_vertical(image: DynamicImage, _: Option<f64>) -> Result<DynamicImage, BoxError> {
    Ok(image.flipv())
}

type FilterImpl = fn(DynamicImage, Option<f64>) -> Result<DynamicImage, BoxError>;

/// Built-in implementation for a kind.
pub fn builtin(kind: FilterKind) -> Arc<dyn FilterFn> {
    let f: FilterImpl = match kind {
        FilterKind::Grayscale => grayscale,
        FilterKind::Sepia => sepia,
        FilterKind::Invert => invert,
        FilterKind::Blur => blur,
        FilterKind::Sharpen => sharpen,
        FilterKind::Brightness => brightness,
        FilterKind::Contrast => contrast,
        FilterKind::HueRotate => hue_rotate,
        FilterKind::Rotate => rotate,
        FilterKind::FlipHorizontal => flip_horizontal,
        FilterKind::FlipVertical => flip_vertical,
    };
    Arc::new(FnFilter::new(kind.as_str(), f))
}
