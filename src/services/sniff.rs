//! Content-type detection from the first bytes of a stream.

/// Bytes read ahead of the stream for detection.
pub const SNIFF_LEN: usize = 512;

const OCTET_STREAM: &str = "application/octet-stream";

struct Signature {
    offset: usize,
    magic: &'static [u8],
    mime: &'static str,
}

const SIGNATURES: &[Signature] = &[
    Signature { offset: 0, magic: b"\x89PNG\r\n\x1a\n", mime: "image/png" },
    Signature { offset: 0, magic: b"\xff\xd8\xff", mime: "image/jpeg" },
    Signature { offset: 0, magic: b"GIF87a", mime: "image/gif" },
    Signature { offset: 0, magic: b"GIF89a", mime: "image/gif" },
    Signature { offset: 0, magic: b"BM", mime: "image/bmp" },
    Signature { offset: 0, magic: b"II*\x00", mime: "image/tiff" },
    Signature { offset: 0, magic: b"MM\x00*", mime: "image/tiff" },
    Signature { offset: 0, magic: b"%PDF-", mime: "application/pdf" },
    Signature { offset: 0, magic: b"PK\x03\x04", mime: "application/zip" },
    Signature { offset: 0, magic: b"\x1f\x8b\x08", mime: "application/gzip" },
    Signature { offset: 0, magic: b"7z\xbc\xaf\x27\x1c", mime: "application/x-7z-compressed" },
    Signature { offset: 0, magic: b"Rar!\x1a\x07", mime: "application/vnd.rar" },
    Signature { offset: 0, magic: b"ID3", mime: "audio/mpeg" },
    Signature { offset: 0, magic: b"OggS", mime: "audio/ogg" },
    Signature { offset: 0, magic: b"fLaC", mime: "audio/flac" },
    Signature { offset: 0, magic: b"\x1a\x45\xdf\xa3", mime: "video/webm" },
    Signature { offset: 4, magic: b"ftyp", mime: "video/mp4" },
];

/// RIFF containers carry their format at offset 8.
fn sniff_riff(buf: &[u8]) -> Option<&'static str> {
    if buf.len() < 12 || &buf[..4] != b"RIFF" {
        return None;
    }
    match &buf[8..12] {
        b"WEBP" => Some("image/webp"),
        b"WAVE" => Some("audio/wav"),
        b"AVI " => Some("video/x-msvideo"),
        _ => None,
    }
}

fn looks_like_text(buf: &[u8]) -> bool {
    if buf.is_empty() || buf.contains(&0) {
        return false;
    }
    match std::str::from_utf8(buf) {
        Ok(_) => true,
        // A multi-byte sequence cut at the end of the sniff window is still text.
        Err(e) => e.error_len().is_none() && e.valid_up_to() + 4 > buf.len(),
    }
}

/// Detect a MIME type from magic bytes, then the filename, then a text
/// heuristic. Never fails; unknown content is `application/octet-stream`.
pub fn detect_content_type(buf: &[u8], filename: &str) -> String {
    if let Some(mime) = sniff_riff(buf) {
        return mime.to_string();
    }
    for sig in SIGNATURES {
        let end = sig.offset + sig.magic.len();
        if buf.len() >= end && &buf[sig.offset..end] == sig.magic {
            return sig.mime.to_string();
        }
    }
    if let Some(guess) = mime_guess::from_path(filename).first() {
        return guess.essence_str().to_string();
    }
    if looks_like_text(buf) {
        return "text/plain".to_string();
    }
    OCTET_STREAM.to_string()
}

/// Strip parameters (`; charset=...`) and lowercase.
pub fn essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_lowercase()
}
