//! Content-type compressibility check used by the default filter.

/// Non-text types that still compress well.
const COMPRESSIBLE_TYPES: &[&str] = &[
    "application/ecmascript",
    "application/graphql",
    "application/javascript",
    "application/json",
    "application/postscript",
    "application/rtf",
    "application/vnd.ms-fontobject",
    "application/wasm",
    "application/x-font-ttf",
    "application/x-javascript",
    "application/x-www-form-urlencoded",
    "application/xml",
    "font/otf",
    "font/ttf",
    "image/bmp",
    "image/vnd.microsoft.icon",
    "image/x-icon",
];

/// Returns whether a body with this `Content-Type` is worth compressing.
///
/// Parameters such as `charset` are ignored. A missing or empty type is
/// treated as not compressible.
pub fn is_compressible(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };
    if kind.is_empty() || subtype.is_empty() {
        return false;
    }

    kind == "text"
        || subtype.ends_with("+json")
        || subtype.ends_with("+text")
        || subtype.ends_with("+xml")
        || COMPRESSIBLE_TYPES.contains(&essence.as_str())
}
