// src/mime.rs
use std::time::SystemTime;

/// Extension -> content type. Direct match beats a map lookup for a set this small.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = match path.rfind('.') {
        Some(idx) => &path[idx + 1..],
        None => return "application/octet-stream",
    };

    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "text/xml",
        "txt" => "text/plain",

        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",

        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "eot" => "application/vnd.ms-fontobject",

        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogg" => "video/ogg",

        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",

        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",

        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",

        _ => "application/octet-stream",
    }
}

/// Lexically collapse `.` and `..` segments. A `..` that would climb past the
/// first segment is kept, so the safety check below still sees it.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if stack.last().map_or(true, |s| *s == "..") {
                    stack.push("..");
                } else {
                    stack.pop();
                }
            }
            other => stack.push(other),
        }
    }

    let joined = stack.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Traversal guard: a normalized path must carry no `..` and no empty segment.
pub fn is_safe_path(path: &str) -> bool {
    !path.contains("..") && !path.contains("//")
}

pub fn format_http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value).ok()
}
