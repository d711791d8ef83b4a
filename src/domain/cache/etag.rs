//! Content-addressed entity tags and conditional request matching

use sha2::{Digest, Sha256};

/// Number of digest bytes kept in an entity tag
const ETAG_DIGEST_BYTES: usize = 16;

/// Strong ETag generation and comparison
#[derive(Debug, Clone, Copy, Default)]
pub struct EtagCodec;

impl EtagCodec {
    /// Computes a quoted strong ETag over the payload bytes
    pub fn compute(payload: &[u8]) -> String {
        let digest = Sha256::digest(payload);
        format!("\"{}\"", hex::encode(&digest[..ETAG_DIGEST_BYTES]))
    }

    /// `If-None-Match` evaluation: weak comparison over a candidate list.
    ///
    /// Returns true when any candidate (or `*`) matches `etag`.
    pub fn matches(etag: &str, if_none_match: &str) -> bool {
        let current = opaque_tag(etag);

        candidates(if_none_match).any(|candidate| candidate == "*" || opaque_tag(candidate) == current)
    }

    /// `If-Match` evaluation: strong comparison, weak candidates never match
    pub fn matches_strong(etag: &str, if_match: &str) -> bool {
        if is_weak(etag) {
            return false;
        }

        candidates(if_match)
            .any(|candidate| candidate == "*" || (!is_weak(candidate) && candidate == etag.trim()))
    }
}

fn candidates(header: &str) -> impl Iterator<Item = &str> {
    header.split(',').map(str::trim).filter(|c| !c.is_empty())
}

fn is_weak(tag: &str) -> bool {
    tag.trim_start().starts_with("W/")
}

fn opaque_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix("W/").unwrap_or(tag)
}
