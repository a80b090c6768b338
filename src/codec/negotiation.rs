use std::cmp::Ordering;
use std::sync::Arc;

use super::{Codec, CodecRegistry, UnsupportedContentType};

/// Resolves declared content types, possibly media ranges such as `text/*;q=0.5, */*;q=0.1`,
/// against a frozen [`CodecRegistry`].
///
/// The negotiator is cheap to clone and shared read-only between every call an invoker serves.
#[derive(Debug, Clone)]
pub struct ContentNegotiator {
    registry: Arc<CodecRegistry>,
}

impl ContentNegotiator {
    pub fn new(registry: CodecRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// Resolve a declared content type to the concrete content type of the best matching codec.
    pub fn resolve(&self, declared: &str) -> Result<&str, UnsupportedContentType> {
        self.best_match(declared).map(Codec::content_type)
    }

    pub fn can_encode(&self, declared: &str) -> bool {
        self.best_match(declared).is_ok()
    }

    pub fn can_decode(&self, declared: &str) -> bool {
        self.best_match(declared).is_ok()
    }

    /// The codec to use for `declared`, after negotiation.
    pub fn codec_for(&self, declared: &str) -> Result<Codec, UnsupportedContentType> {
        self.best_match(declared).cloned()
    }

    fn best_match(&self, declared: &str) -> Result<&Codec, UnsupportedContentType> {
        let ranges = parse_ranges(declared);

        self.registry
            .iter()
            .enumerate()
            .filter_map(|(position, codec)| {
                let (declared_at, range) = ranges
                    .iter()
                    .enumerate()
                    .filter(|(_, range)| range.matches(codec.content_type()))
                    .max_by(|(a_at, a), (b_at, b)| {
                        a.specificity()
                            .cmp(&b.specificity())
                            .then_with(|| b_at.cmp(a_at))
                    })?;
                (range.quality > 0.0).then_some(Candidate {
                    quality: range.quality,
                    declared_at,
                    position,
                    codec,
                })
            })
            .min_by(Candidate::preference)
            .map(|candidate| candidate.codec)
            .ok_or_else(|| UnsupportedContentType {
                content_type: declared.to_string(),
            })
    }
}

impl Default for ContentNegotiator {
    fn default() -> Self {
        Self::new(CodecRegistry::with_defaults())
    }
}

struct Candidate<'a> {
    quality: f32,
    declared_at: usize,
    position: usize,
    codec: &'a Codec,
}

impl Candidate<'_> {
    /// Orders the preferred candidate first.
    fn preference(a: &Self, b: &Self) -> Ordering {
        b.quality
            .partial_cmp(&a.quality)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.declared_at.cmp(&b.declared_at))
            .then_with(|| a.position.cmp(&b.position))
    }
}

#[derive(Debug, PartialEq)]
struct MediaRange {
    ty: String,
    subtype: String,
    quality: f32,
}

impl MediaRange {
    fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let essence = parts.next()?.trim().to_ascii_lowercase();
        let (ty, subtype) = essence.split_once('/')?;
        if ty.is_empty() || subtype.is_empty() || (ty == "*" && subtype != "*") {
            return None;
        }

        let mut quality = 1.0;
        for param in parts {
            let Some((name, value)) = param.split_once('=') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("q") {
                quality = value.trim().parse::<f32>().ok()?.clamp(0.0, 1.0);
            }
        }

        Some(Self {
            ty: ty.to_string(),
            subtype: subtype.to_string(),
            quality,
        })
    }

    fn matches(&self, content_type: &str) -> bool {
        let Some((ty, subtype)) = content_type.split_once('/') else {
            return false;
        };
        (self.ty == "*" || self.ty.eq_ignore_ascii_case(ty))
            && (self.subtype == "*" || self.subtype.eq_ignore_ascii_case(subtype))
    }

    fn specificity(&self) -> u8 {
        match (self.ty.as_str(), self.subtype.as_str()) {
            ("*", _) => 0,
            (_, "*") => 1,
            _ => 2,
        }
    }
}

fn parse_ranges(declared: &str) -> Vec<MediaRange> {
    declared.split(',').filter_map(MediaRange::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{APPLICATION_JSON, APPLICATION_OCTET_STREAM, TEXT_PLAIN};

    fn negotiator() -> ContentNegotiator {
        ContentNegotiator::default()
    }

    #[test]
    fn test_exact_match() {
        assert_eq!(negotiator().resolve("text/plain").unwrap(), TEXT_PLAIN);
        assert_eq!(negotiator().resolve("Application/JSON").unwrap(), APPLICATION_JSON);
    }

    #[test]
    fn test_parameters_are_ignored() {
        assert_eq!(
            negotiator().resolve("text/plain; charset=utf-8").unwrap(),
            TEXT_PLAIN
        );
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(negotiator().resolve("text/*").unwrap(), TEXT_PLAIN);
        // registration order breaks the tie
        assert_eq!(negotiator().resolve("*/*").unwrap(), APPLICATION_JSON);
        assert_eq!(
            negotiator().resolve("application/*;q=0.2, application/octet-stream").unwrap(),
            APPLICATION_OCTET_STREAM
        );
    }

    #[test]
    fn test_quality_ordering() {
        assert_eq!(
            negotiator()
                .resolve("application/json;q=0.4, text/plain;q=0.9")
                .unwrap(),
            TEXT_PLAIN
        );
        // the more specific range decides the quality of a codec
        assert_eq!(
            negotiator()
                .resolve("*/*;q=0.8, application/json;q=0")
                .unwrap(),
            TEXT_PLAIN
        );
    }

    #[test]
    fn test_unsupported() {
        let err = negotiator().resolve("application/x-doom").unwrap_err();
        assert_eq!(err.content_type, "application/x-doom");
        assert!(!negotiator().can_decode("text/nope"));
        assert!(!negotiator().can_encode(""));
        assert!(negotiator().resolve("text/plain;q=0").is_err());
    }

    #[test]
    fn test_codec_for() {
        let codec = negotiator().codec_for("text/*").unwrap();
        assert_eq!(codec.content_type(), TEXT_PLAIN);
    }
}
