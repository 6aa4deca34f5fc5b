//! Source-format sniffing for the direct-send fast path.
//!
//! Magic bytes win over the file extension; the extension is the fallback
//! for formats whose header we do not inspect (PDF is header-checked too,
//! everything else falls through).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::iiif::Format;

/// Detect an image format from the leading bytes of a file.
pub fn sniff_magic_bytes(data: &[u8]) -> Option<Format> {
    if data.len() < 4 {
        return None;
    }

    // JPEG: FF D8 FF
    if data[0] == 0xFF && data[1] == 0xD8 && data[2] == 0xFF {
        return Some(Format::Jpg);
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.len() >= 8 && data[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some(Format::Png);
    }

    // TIFF: II*\0 (little endian) or MM\0* (big endian)
    if &data[0..4] == b"II\x2A\x00" || &data[0..4] == b"MM\x00\x2A" {
        return Some(Format::Tif);
    }

    // JP2: 00 00 00 0C 6A 50 20 20 signature box
    if data.len() >= 8 && data[0..4] == [0x00, 0x00, 0x00, 0x0C] && &data[4..8] == b"jP  " {
        return Some(Format::Jp2);
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some(Format::Webp);
    }

    // GIF: GIF87a or GIF89a
    if data.len() >= 6 && &data[0..3] == b"GIF" {
        return Some(Format::Gif);
    }

    // PDF: %PDF
    if &data[0..4] == b"%PDF" {
        return Some(Format::Pdf);
    }

    None
}

/// Best-effort format of a file on disk: magic bytes first, extension
/// fallback, `Unsupported` when neither matches.
pub fn sniff_file(path: &Path) -> Format {
    let mut head = [0u8; 16];
    let n = File::open(path)
        .and_then(|mut f| f.read(&mut head))
        .unwrap_or(0);

    if let Some(format) = sniff_magic_bytes(&head[..n]) {
        return format;
    }

    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| Format::from_extension(&ext.to_ascii_lowercase()))
        .unwrap_or(Format::Unsupported)
}

/// Mimetype reported for raw blob responses; extension-based detection for
/// the handful of non-image types the blob endpoint commonly serves.
pub fn blob_mime_type(path: &Path) -> &'static str {
    let format = sniff_file(path);
    if format != Format::Unsupported {
        return format.mime_type();
    }

    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("xml") => "application/xml",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::sniff_magic_bytes;
    use crate::iiif::Format;

    #[test]
    fn jpeg_magic_is_detected() {
        let header = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        assert_eq!(sniff_magic_bytes(&header), Some(Format::Jpg));
    }

    #[test]
    fn png_magic_is_detected() {
        let header = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(sniff_magic_bytes(&header), Some(Format::Png));
    }

    #[test]
    fn tiff_magic_is_detected_both_endians() {
        assert_eq!(sniff_magic_bytes(b"II\x2A\x00rest"), Some(Format::Tif));
        assert_eq!(sniff_magic_bytes(b"MM\x00\x2Arest"), Some(Format::Tif));
    }

    #[test]
    fn jp2_signature_box_is_detected() {
        let mut header = [0u8; 12];
        header[3] = 0x0C;
        header[4..8].copy_from_slice(b"jP  ");
        assert_eq!(sniff_magic_bytes(&header), Some(Format::Jp2));
    }

    #[test]
    fn unknown_bytes_are_not_detected() {
        assert_eq!(sniff_magic_bytes(b"BM123456"), None);
        assert_eq!(sniff_magic_bytes(b"ab"), None);
    }
}
