//! Extension-to-category table used to classify shared files.

/// Classify a file by its extension (case-insensitive, no leading dot).
/// Unrecognized extensions fall back to `"other"`.
pub fn category_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "svg" => "images",
        "mp3" | "wav" | "flac" | "ogg" | "aac" | "m4a" => "audio",
        "mp4" | "mkv" | "avi" | "mov" | "webm" => "video",
        "pdf" | "doc" | "docx" | "txt" | "odt" | "rtf" => "documents",
        "zip" | "rar" | "7z" | "tar" | "gz" | "xz" => "archives",
        "exe" | "msi" | "appimage" | "deb" | "rpm" => "software",
        "iso" | "rom" | "sav" => "games",
        "epub" | "mobi" | "azw3" => "ebooks",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_classify() {
        assert_eq!(category_for_extension("PNG"), "images");
        assert_eq!(category_for_extension("mp3"), "audio");
        assert_eq!(category_for_extension("epub"), "ebooks");
    }

    #[test]
    fn unknown_extension_is_other() {
        assert_eq!(category_for_extension("xyz"), "other");
    }
}
