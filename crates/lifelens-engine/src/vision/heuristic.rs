use lifelens_contracts::{Category, ImageInput, SourceProvider, Tier};

use crate::error::ProviderError;
use crate::vision::prepare::{color_name, read_basic_image_stats, ImageSignature};
use crate::vision::VisionProvider;

/// Zero-network analyzer: label, container signature, size and, when the
/// payload decodes, a color and exposure summary. Always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, image: &ImageInput, category: Option<Category>) -> String {
        let signature = ImageSignature::sniff(&image.payload);
        let subject = match image.label.trim() {
            "" => "Unlabeled option",
            label => label,
        };
        let kind = match category {
            Some(Category::Food) => " (food)",
            Some(Category::Clothing) => " (clothing)",
            Some(Category::Activity) => " (activity)",
            Some(Category::Work) => " (work)",
            Some(Category::Social) => " (social)",
            Some(Category::Other) | None => "",
        };

        let detail = match read_basic_image_stats(&image.payload) {
            Some(stats) => {
                let tone = if stats.brightness < 0.3 {
                    "dark"
                } else if stats.brightness > 0.75 {
                    "bright"
                } else {
                    "evenly lit"
                };
                let vividness = if stats.saturation < 0.2 {
                    "muted"
                } else if stats.saturation > 0.6 {
                    "vivid"
                } else {
                    "moderately saturated"
                };
                let orientation = match stats.width.cmp(&stats.height) {
                    std::cmp::Ordering::Greater => "landscape",
                    std::cmp::Ordering::Less => "portrait",
                    std::cmp::Ordering::Equal => "square",
                };
                format!(
                    "mostly {} {}, {tone} and {vividness}, {}x{} {orientation}",
                    color_name(stats.mean_r, stats.mean_g, stats.mean_b),
                    signature.label(),
                    stats.width,
                    stats.height,
                )
            }
            None => format!("{}, {}", signature.label(), human_size(image.size())),
        };
        format!("{subject}{kind}: {detail}")
    }
}

impl VisionProvider for HeuristicAnalyzer {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn source(&self) -> SourceProvider {
        SourceProvider::Heuristic
    }

    fn is_available(&self, _tier: Tier) -> bool {
        true
    }

    fn describe(
        &self,
        image: &ImageInput,
        category: Option<Category>,
    ) -> Result<String, ProviderError> {
        Ok(self.analyze(image, category))
    }
}

fn human_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    let value = bytes as f64;
    if value >= KB * KB {
        format!("{:.1} MB", value / (KB * KB))
    } else if value >= KB {
        format!("{:.0} KB", value / KB)
    } else {
        format!("{bytes} bytes")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};
    use lifelens_contracts::{Category, ImageInput};

    use super::{human_size, HeuristicAnalyzer};

    #[test]
    fn decodable_image_gets_color_summary() {
        let mut image = RgbImage::new(30, 60);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([20, 40, 210]);
        }
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).expect("png");
        let input = ImageInput::new(bytes.into_inner(), "Blue Hoodie");
        let text = HeuristicAnalyzer::new().analyze(&input, Some(Category::Clothing));
        assert_eq!(
            text,
            "Blue Hoodie (clothing): mostly blue PNG image, evenly lit and vivid, 30x60 portrait"
        );
    }

    #[test]
    fn opaque_payload_falls_back_to_signature_and_size() {
        let mut payload = vec![0xFF, 0xD8, 0xFF, 0xE0];
        payload.resize(3 * 1024, 0);
        let input = ImageInput::new(payload, "Pasta");
        let text = HeuristicAnalyzer::new().analyze(&input, Some(Category::Food));
        assert_eq!(text, "Pasta (food): JPEG photo, 3 KB");
    }

    #[test]
    fn sizes_are_humanized() {
        assert_eq!(human_size(512), "512 bytes");
        assert_eq!(human_size(2 * 1024 * 1024 + 1), "2.0 MB");
    }
}
