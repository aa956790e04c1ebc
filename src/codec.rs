use crate::config::EncoderOptions;
use compression_codecs::{
    EncodeV2,
    brotli::{BrotliEncoder, params::EncoderParams as BrotliParams},
    gzip::GzipEncoder,
    zlib::ZlibEncoder,
};
use compression_core::Level;
use std::cmp::Ordering;

/// Content codings the negotiator may pick, in declaration order.
pub const SUPPORTED_ENCODINGS: [&str; 4] = ["br", "gzip", "deflate", "identity"];

/// Codings preferred when the client rates several equally.
pub const PREFERRED_ENCODINGS: [&str; 2] = ["br", "gzip"];

/// Supported compression codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Brotli compression.
    Brotli,
    /// Gzip compression.
    Gzip,
    /// HTTP `deflate`, i.e. zlib-wrapped DEFLATE.
    Deflate,
}

impl Codec {
    /// Returns the Content-Encoding header value for this codec.
    pub fn content_encoding(&self) -> &'static str {
        match self {
            Codec::Brotli => "br",
            Codec::Gzip => "gzip",
            Codec::Deflate => "deflate",
        }
    }

    /// Maps a negotiated coding token to a codec. `identity` has none.
    pub fn from_token(token: &str) -> Option<Codec> {
        match token.trim().to_ascii_lowercase().as_str() {
            "br" => Some(Codec::Brotli),
            "gzip" => Some(Codec::Gzip),
            "deflate" => Some(Codec::Deflate),
            _ => None,
        }
    }

    /// Creates a new encoder for this codec.
    pub fn encoder(&self, options: &EncoderOptions) -> Box<dyn EncodeV2 + Send> {
        let level = options.level.map_or(Level::Default, Level::Precise);
        match self {
            Codec::Brotli => {
                let mut params =
                    BrotliParams::default().quality(Level::Precise(options.brotli_quality as i32));
                if let Some(lgwin) = options.brotli_window {
                    params = params.window_size(lgwin);
                }
                Box::new(BrotliEncoder::new(params))
            }
            Codec::Gzip => Box::new(GzipEncoder::new(level.into())),
            Codec::Deflate => Box::new(ZlibEncoder::new(level.into())),
        }
    }
}

/// One parsed `Accept-Encoding` entry.
#[derive(Debug, Clone, Copy)]
struct Accepted<'a> {
    encoding: &'a str,
    q: f32,
    index: usize,
}

/// How well a provided coding matches the header.
#[derive(Debug, Clone, Copy)]
struct Priority<'a> {
    encoding: &'a str,
    /// Position in the provided list.
    index: usize,
    /// Index of the matching header entry; `None` when nothing matched.
    order: Option<usize>,
    q: f32,
    /// 1 for an exact match, 0 for `*`.
    specificity: u8,
}

/// Picks the coding to respond with.
///
/// `header` is the request's `Accept-Encoding` value (`None` when absent).
/// Among the `supported` codings the client accepts with a non-zero quality,
/// the highest quality wins; ties go to the `preferred` list first, then to
/// the more specific and earlier header entry. `identity` is implicitly
/// acceptable unless the header rules it out.
pub fn negotiate<'a>(header: Option<&str>, supported: &[&'a str], preferred: &[&str]) -> Option<&'a str> {
    let accepted = parse_accept_encoding(header.unwrap_or(""));

    let mut priorities: Vec<Priority<'a>> = supported
        .iter()
        .enumerate()
        .map(|(index, encoding)| encoding_priority(encoding, &accepted, index))
        .filter(|p| p.q > 0.0)
        .collect();

    priorities.sort_by(|a, b| compare_priority(a, b, preferred));
    priorities.first().map(|p| p.encoding)
}

fn parse_accept_encoding(header: &str) -> Vec<Accepted<'_>> {
    let mut accepted = Vec::new();
    let mut has_identity = false;
    let mut min_quality = 1.0_f32;
    let mut count = 0;

    for (index, part) in header.split(',').enumerate() {
        count = index + 1;
        let Some(entry) = parse_encoding(part.trim(), index) else {
            continue;
        };
        has_identity = has_identity || specificity("identity", entry.encoding).is_some();
        // A zero quality does not lower the implicit identity quality.
        min_quality = min_quality.min(if entry.q > 0.0 { entry.q } else { 1.0 });
        accepted.push(entry);
    }

    if !has_identity {
        accepted.push(Accepted {
            encoding: "identity",
            q: min_quality,
            index: count,
        });
    }

    accepted
}

/// Parses an entry like "gzip" or "br;q=0.8".
fn parse_encoding(s: &str, index: usize) -> Option<Accepted<'_>> {
    let (encoding, params) = match s.split_once(';') {
        Some((encoding, params)) => (encoding.trim_end(), Some(params)),
        None => (s, None),
    };
    if encoding.is_empty() || encoding.contains(char::is_whitespace) {
        return None;
    }

    let q = params
        .and_then(|params| {
            params.split(';').find_map(|param| {
                let (name, value) = param.trim().split_once('=')?;
                (name.trim() == "q").then(|| parse_quality(value))
            })
        })
        .unwrap_or(1.0);

    Some(Accepted {
        encoding,
        q: if q.is_finite() { q } else { 0.0 },
        index,
    })
}

/// Reads the leading decimal number of a quality value; trailing garbage is
/// ignored and a value with no number is 0.
fn parse_quality(value: &str) -> f32 {
    let value = value.trim_start();
    let mut seen_dot = false;
    let end = value
        .char_indices()
        .find(|&(_, c)| match c {
            '0'..='9' => false,
            '.' if !seen_dot => {
                seen_dot = true;
                false
            }
            _ => true,
        })
        .map_or(value.len(), |(i, _)| i);
    value[..end].parse().unwrap_or(0.0)
}

fn specificity(encoding: &str, accepted: &str) -> Option<u8> {
    if accepted.eq_ignore_ascii_case(encoding) {
        Some(1)
    } else if accepted == "*" {
        Some(0)
    } else {
        None
    }
}

fn encoding_priority<'a>(encoding: &'a str, accepted: &[Accepted<'_>], index: usize) -> Priority<'a> {
    let mut priority = Priority {
        encoding,
        index,
        order: None,
        q: 0.0,
        specificity: 0,
    };

    for entry in accepted {
        let Some(specificity) = specificity(encoding, entry.encoding) else {
            continue;
        };
        let better = specificity
            .cmp(&priority.specificity)
            .then(entry.q.partial_cmp(&priority.q).unwrap_or(Ordering::Equal))
            .then(Some(entry.index).cmp(&priority.order));
        if better == Ordering::Greater {
            priority = Priority {
                encoding,
                index,
                order: Some(entry.index),
                q: entry.q,
                specificity,
            };
        }
    }

    priority
}

fn compare_priority(a: &Priority<'_>, b: &Priority<'_>, preferred: &[&str]) -> Ordering {
    // Higher quality first
    match b.q.partial_cmp(&a.q) {
        Some(Ordering::Equal) | None => {}
        Some(ordering) => return ordering,
    }

    let a_preferred = preferred.iter().position(|p| *p == a.encoding);
    let b_preferred = preferred.iter().position(|p| *p == b.encoding);
    match (a_preferred, b_preferred) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b
            .specificity
            .cmp(&a.specificity)
            .then(a.order.cmp(&b.order))
            .then(a.index.cmp(&b.index)),
    }
}
