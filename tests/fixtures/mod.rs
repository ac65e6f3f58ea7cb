//! Test images and manifests

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;

pub const MANIFEST_HEADER: &str = "S. No.,Product Name,Input Image Urls";

/// A small, detailed JPEG so recompression has something to work with.
pub fn jpeg_bytes() -> Vec<u8> {
    let img = RgbImage::from_fn(48, 32, |x, y| {
        Rgb([(x * 5 % 256) as u8, (y * 8 % 256) as u8, ((x + y) * 3 % 256) as u8])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

pub fn png_bytes() -> Vec<u8> {
    let img = RgbaImage::from_fn(20, 20, |x, y| Rgba([x as u8 * 10, y as u8 * 10, 128, 200]));
    encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).expect("encode fixture image");
    buf.into_inner()
}

/// Build a manifest body from `(serial, name, urls)` rows.
pub fn manifest(rows: &[(&str, &str, &str)]) -> String {
    let mut csv = format!("{}\n", MANIFEST_HEADER);
    for (serial, name, urls) in rows {
        csv.push_str(&format!("{},{},\"{}\"\n", serial, name, urls));
    }
    csv
}
