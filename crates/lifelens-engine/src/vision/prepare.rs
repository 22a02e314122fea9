use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

/// Upload size sent to remote vision models.
pub(crate) const VISION_MAX_DIM: u32 = 768;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BasicImageStats {
    pub width: u32,
    pub height: u32,
    pub mean_r: f64,
    pub mean_g: f64,
    pub mean_b: f64,
    pub brightness: f64,
    pub saturation: f64,
    pub palette: Vec<String>,
}

/// Container format guessed from the leading magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageSignature {
    Jpeg,
    Png,
    Gif,
    Webp,
    Heic,
    Bmp,
    Unknown,
}

impl ImageSignature {
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Self::Jpeg
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Self::Png
        } else if bytes.starts_with(b"GIF8") {
            Self::Gif
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Self::Webp
        } else if bytes.len() >= 12
            && &bytes[4..8] == b"ftyp"
            && matches!(&bytes[8..12], b"heic" | b"heix" | b"mif1" | b"msf1")
        {
            Self::Heic
        } else if bytes.starts_with(b"BM") {
            Self::Bmp
        } else {
            Self::Unknown
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Heic => "image/heic",
            Self::Bmp => "image/bmp",
            Self::Unknown => "application/octet-stream",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG photo",
            Self::Png => "PNG image",
            Self::Gif => "GIF image",
            Self::Webp => "WebP image",
            Self::Heic => "HEIC photo",
            Self::Bmp => "bitmap image",
            Self::Unknown => "image",
        }
    }
}

/// Flattens alpha onto white, downsizes to `max_dim` and re-encodes as JPEG.
/// Undecodable payloads are passed through with their sniffed mime type.
pub(crate) fn prepare_vision_image(bytes: &[u8], max_dim: u32) -> Option<(Vec<u8>, String)> {
    if bytes.is_empty() {
        return None;
    }
    let dim = max_dim.max(128);
    if let Ok(image) = image::load_from_memory(bytes) {
        let rgba = image.to_rgba8();
        let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
        for (x, y, pixel) in rgba.enumerate_pixels() {
            let alpha = u16::from(pixel[3]);
            let blend = |channel: u8| -> u8 {
                (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
            };
            flattened.put_pixel(
                x,
                y,
                Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
            );
        }
        let resized = DynamicImage::ImageRgba8(flattened)
            .resize(dim, dim, FilterType::Triangle)
            .to_rgb8();
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, 90);
        if encoder
            .encode_image(&DynamicImage::ImageRgb8(resized))
            .is_ok()
        {
            return Some((out, "image/jpeg".to_string()));
        }
    }
    let signature = ImageSignature::sniff(bytes);
    if signature == ImageSignature::Unknown {
        return None;
    }
    Some((bytes.to_vec(), signature.mime().to_string()))
}

pub(crate) fn prepare_vision_image_base64(bytes: &[u8], max_dim: u32) -> Option<(String, String)> {
    let (prepared, mime) = prepare_vision_image(bytes, max_dim)?;
    Some((BASE64.encode(prepared), mime))
}

pub(crate) fn prepare_vision_image_data_url(bytes: &[u8], max_dim: u32) -> Option<String> {
    let (encoded, mime) = prepare_vision_image_base64(bytes, max_dim)?;
    Some(format!("data:{mime};base64,{encoded}"))
}

pub(crate) fn read_basic_image_stats(bytes: &[u8]) -> Option<BasicImageStats> {
    let image = image::load_from_memory(bytes).ok()?;
    let resized = image.resize_exact(96, 96, FilterType::Triangle).to_rgb8();
    let mut total_r = 0f64;
    let mut total_g = 0f64;
    let mut total_b = 0f64;
    let mut total_brightness = 0f64;
    let mut total_saturation = 0f64;
    let mut bins: HashMap<(u8, u8, u8), u64> = HashMap::new();
    let mut count = 0f64;

    for pixel in resized.pixels() {
        let r = pixel[0] as f64;
        let g = pixel[1] as f64;
        let b = pixel[2] as f64;
        total_r += r;
        total_g += g;
        total_b += b;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        total_brightness += (r + g + b) / (255.0 * 3.0);
        total_saturation += if max <= 0.0 { 0.0 } else { (max - min) / max };
        count += 1.0;

        let quantize = |channel: u8| ((channel as u16 / 32) * 32).min(255) as u8;
        *bins
            .entry((quantize(pixel[0]), quantize(pixel[1]), quantize(pixel[2])))
            .or_insert(0) += 1;
    }

    if count <= 0.0 {
        return None;
    }

    let mut dominant: Vec<((u8, u8, u8), u64)> = bins.into_iter().collect();
    dominant.sort_by(|left, right| right.1.cmp(&left.1).then(left.0.cmp(&right.0)));
    let palette: Vec<String> = dominant
        .into_iter()
        .take(4)
        .map(|((r, g, b), _)| format!("#{r:02X}{g:02X}{b:02X}"))
        .collect();

    Some(BasicImageStats {
        width: image.width(),
        height: image.height(),
        mean_r: total_r / count,
        mean_g: total_g / count,
        mean_b: total_b / count,
        brightness: (total_brightness / count).clamp(0.0, 1.0),
        saturation: (total_saturation / count).clamp(0.0, 1.0),
        palette,
    })
}

pub(crate) fn color_name(r: f64, g: f64, b: f64) -> &'static str {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let brightness = ((r + g + b) / (255.0 * 3.0)).clamp(0.0, 1.0);
    if max - min < 18.0 {
        if brightness > 0.78 {
            return "white or light neutral";
        }
        if brightness < 0.22 {
            return "black or dark neutral";
        }
        return "grey";
    }
    if max == r && g > b {
        if g > r * 0.75 {
            "yellow"
        } else {
            "orange"
        }
    } else if max == r {
        if b > r * 0.5 {
            "pink or magenta"
        } else {
            "red"
        }
    } else if max == g && b > r {
        "teal"
    } else if max == g {
        "green"
    } else if max == b && r > g {
        "purple"
    } else {
        "blue"
    }
}
