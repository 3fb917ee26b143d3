use std::str::FromStr;
use std::sync::Arc;

use crate::error::StorageError;
use crate::models::file::MediaType;
use crate::services::naming::sanitize_segment;
use crate::services::routing_rules::RoutingRules;
use crate::services::sniff::essence;

const IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "tif", "tiff", "heic", "ico", "avif",
];
const VIDEO_EXTS: &[&str] = &["mp4", "mkv", "mov", "avi", "webm", "m4v", "wmv", "flv"];
const AUDIO_EXTS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac", "opus", "wma"];
const DOCUMENT_EXTS: &[&str] = &[
    "pdf", "doc", "docx", "odt", "rtf", "txt", "md", "xls", "xlsx", "ods", "csv", "ppt", "pptx",
    "odp", "epub",
];
const CODE_EXTS: &[&str] = &[
    "rs", "go", "py", "js", "ts", "tsx", "jsx", "c", "h", "cpp", "hpp", "cc", "java", "kt", "rb",
    "php", "cs", "swift", "sh", "sql", "html", "css", "json", "yaml", "yml", "toml", "xml",
];
const ARCHIVE_EXTS: &[&str] = &["zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "zst"];

const DOCUMENT_MIMES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/rtf",
    "application/epub+zip",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

/// Explicit placement requested by the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageOverride {
    #[default]
    Auto,
    Image,
    Video,
    Audio,
    Document,
    Code,
}

impl StorageOverride {
    fn media_type(self) -> Option<MediaType> {
        match self {
            StorageOverride::Auto => None,
            StorageOverride::Image => Some(MediaType::Image),
            StorageOverride::Video => Some(MediaType::Video),
            StorageOverride::Audio => Some(MediaType::Audio),
            StorageOverride::Document => Some(MediaType::Document),
            StorageOverride::Code => Some(MediaType::Code),
        }
    }

    pub fn parse_optional(value: Option<&str>) -> Result<Self, StorageError> {
        value
            .map(str::parse::<StorageOverride>)
            .transpose()
            .map(Option::unwrap_or_default)
    }
}

impl FromStr for StorageOverride {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(StorageOverride::Auto),
            "image" => Ok(StorageOverride::Image),
            "video" => Ok(StorageOverride::Video),
            "audio" => Ok(StorageOverride::Audio),
            "document" => Ok(StorageOverride::Document),
            "code" => Ok(StorageOverride::Code),
            other => Err(StorageError::InvalidOverride(format!(
                "'{}' (expected auto, image, video, audio, document or code)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Media type used for placement (the override when one was given).
    pub media_type: MediaType,
    pub category: String,
    /// MIME as detected, recorded even when placement was overridden.
    pub detected_mime: String,
    pub rule_id: Option<String>,
}

fn extension_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

#[derive(Clone)]
pub struct Classifier {
    rules: Arc<RoutingRules>,
}

impl Classifier {
    pub fn new(rules: Arc<RoutingRules>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &Arc<RoutingRules> {
        &self.rules
    }

    /// Default media type: MIME prefix first, extension as fallback.
    pub fn detect_media_type(mime: &str, filename: &str) -> MediaType {
        let mime = essence(mime);
        if mime.starts_with("image/") {
            return MediaType::Image;
        }
        if mime.starts_with("video/") {
            return MediaType::Video;
        }
        if mime.starts_with("audio/") {
            return MediaType::Audio;
        }
        if mime.starts_with("text/") || DOCUMENT_MIMES.contains(&mime.as_str()) {
            return MediaType::Document;
        }

        let Some(ext) = extension_of(filename) else {
            return MediaType::Other;
        };
        let ext = ext.as_str();
        if IMAGE_EXTS.contains(&ext) {
            MediaType::Image
        } else if VIDEO_EXTS.contains(&ext) {
            MediaType::Video
        } else if AUDIO_EXTS.contains(&ext) {
            MediaType::Audio
        } else if DOCUMENT_EXTS.contains(&ext) {
            MediaType::Document
        } else if CODE_EXTS.contains(&ext) {
            MediaType::Code
        } else if ARCHIVE_EXTS.contains(&ext) {
            MediaType::Archive
        } else {
            MediaType::Other
        }
    }

    pub fn is_recognized(&self, mime: &str, filename: &str) -> bool {
        Self::detect_media_type(mime, filename) != MediaType::Other
            || self.rules.find_rule(mime, extension_of(filename).as_deref()).is_some()
    }

    /// Resolve placement. Precedence: explicit override, then a custom
    /// rule, then the default media bucket. The sanitized hint becomes the
    /// leaf segment.
    pub fn classify(
        &self,
        mime: &str,
        filename: &str,
        hint: Option<&str>,
        storage_override: StorageOverride,
    ) -> Classification {
        let detected_mime = essence(mime);
        let detected = Self::detect_media_type(&detected_mime, filename);

        let (media_type, base, rule_id) = match storage_override.media_type() {
            Some(forced) => (forced, forced.bucket().to_string(), None),
            None => match self
                .rules
                .find_rule(&detected_mime, extension_of(filename).as_deref())
            {
                Some(rule) => (detected, rule.destination_path(), Some(rule.id)),
                None => (detected, detected.bucket().to_string(), None),
            },
        };

        let category = match hint.and_then(sanitize_segment) {
            Some(leaf) => format!("{}/{}", base, leaf),
            None => base,
        };

        Classification {
            media_type,
            category,
            detected_mime,
            rule_id,
        }
    }
}
