//! File-extension helpers used for staging identifiers and output-format
//! inference.

/// Extract the extension from a filename or staging identifier.
///
/// Takes the last `.`-separated segment and drops any `?query` suffix. A
/// name without a dot yields the whole name, so `"png"` maps to `"png"`.
pub fn file_extension(name: &str) -> &str {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.split('?').next().unwrap_or(last)
}

/// Guess a Content-Type from a staging identifier's extension.
pub fn content_type_for(name: &str) -> &'static str {
    match file_extension(name).to_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
