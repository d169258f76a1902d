//! MIME type selection for submitted images.

/// Pick the MIME type to tag an image with.
///
/// A declared `image/*` content type wins; otherwise the magic bytes decide;
/// otherwise `fallback` is used.
pub fn mime_type_for<'a>(declared: Option<&'a str>, data: &[u8], fallback: &'a str) -> &'a str {
    if let Some(ct) = declared {
        let essence = ct.split(';').next().unwrap_or("").trim();
        if essence.starts_with("image/") && essence.len() > "image/".len() {
            return essence;
        }
    }
    sniff(data).unwrap_or(fallback)
}

/// Detect an image format from its magic bytes.
pub fn sniff(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if data.starts_with(&[0xff, 0xd8, 0xff]) {
        return Some("image/jpeg");
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if data.starts_with(b"BM") {
        return Some("image/bmp");
    }
    if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
        return Some("image/tiff");
    }
    // ISO base media: `....ftyp<brand>`
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        match &data[8..12] {
            b"heic" | b"heix" | b"hevc" | b"hevx" => return Some("image/heic"),
            b"mif1" | b"msf1" | b"heif" => return Some("image/heif"),
            _ => {}
        }
    }
    None
}
