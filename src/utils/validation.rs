use std::path::Path;

const MAX_FILENAME_BYTES: usize = 255;

/// Reduces a client-supplied filename to a single safe path component.
///
/// The result is used both in object keys and as the AI display name, so
/// path separators and reserved characters never survive.
pub fn sanitize_filename(filename: &str) -> String {
    // Normalise Windows separators so `Path` sees every component
    let unified = filename.replace('\\', "/");
    let name = Path::new(&unified)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path components stripped from upload filename: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = sanitized.trim();
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        return "unnamed".to_string();
    }

    // Limit length safely for UTF-8
    let mut end = sanitized.len().min(MAX_FILENAME_BYTES);
    while !sanitized.is_char_boundary(end) {
        end -= 1;
    }
    sanitized[..end].to_string()
}

/// Lower-cased extension without the leading dot, or an empty string.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}
