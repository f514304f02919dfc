//! Image format detection from magic bytes.

/// Extension (with dot) for the image format `bytes` start with.
///
/// Needs at least eight bytes; anything shorter or unrecognized yields `None`.
pub fn sniff_image_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 8 {
        return None;
    }
    let header = &bytes[..bytes.len().min(20)];
    if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(".jpg")
    } else if header.starts_with(b"\x89PNG") {
        Some(".png")
    } else if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
        Some(".gif")
    } else if header.starts_with(b"RIFF") && header.len() >= 12 && &header[8..12] == b"WEBP" {
        Some(".webp")
    } else if header.starts_with(b"BM") {
        Some(".bmp")
    } else if header.starts_with(b"II*\0") || header.starts_with(b"MM\0*") {
        Some(".tiff")
    } else if header.to_ascii_lowercase().windows(4).any(|w| w == b"<svg") {
        Some(".svg")
    } else if header.starts_with(&[0, 0, 1, 0]) || header.starts_with(&[0, 0, 2, 0]) {
        Some(".ico")
    } else {
        None
    }
}
