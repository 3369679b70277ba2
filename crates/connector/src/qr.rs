use {
    anyhow::{Context, Result},
    base64::Engine,
    image::{GrayImage, ImageFormat, Luma},
    qrcode::{Color, QrCode},
};

/// Pixels per QR module.
const MODULE_SCALE: u32 = 8;
/// Quiet zone around the code, in modules.
const QUIET_ZONE: u32 = 4;

/// Render a pairing payload as a PNG data URL.
///
/// The raw payload stays available to callers that want to render their own
/// code; this image form is what status endpoints hand to browsers.
pub fn render_png_data_url(payload: &str) -> Result<String> {
    let code = QrCode::new(payload.as_bytes()).context("failed to encode QR payload")?;

    let modules = code.width() as u32;
    let size = (modules + 2 * QUIET_ZONE) * MODULE_SCALE;
    let mut img = GrayImage::from_pixel(size, size, Luma([255u8]));

    for y in 0..modules {
        for x in 0..modules {
            if code[(x as usize, y as usize)] != Color::Dark {
                continue;
            }
            let px = (x + QUIET_ZONE) * MODULE_SCALE;
            let py = (y + QUIET_ZONE) * MODULE_SCALE;
            for dy in 0..MODULE_SCALE {
                for dx in 0..MODULE_SCALE {
                    img.put_pixel(px + dx, py + dy, Luma([0u8]));
                }
            }
        }
    }

    let mut png = std::io::Cursor::new(Vec::new());
    img.write_to(&mut png, ImageFormat::Png)
        .context("failed to render QR image")?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(png.into_inner());
    Ok(format!("data:image/png;base64,{encoded}"))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_png_data_url() {
        let url = render_png_data_url("pairing-payload-123").unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        // Decodes back to a PNG header.
        let b64 = url.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn distinct_payloads_render_distinct_images() {
        let a = render_png_data_url("payload-a").unwrap();
        let b = render_png_data_url("payload-b").unwrap();
        assert_ne!(a, b);
    }
}
