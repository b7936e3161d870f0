//! # Transcript Payload Parsing
//!
//! The provider delivers transcripts as JSON with the utterance text nested
//! under `channel.alternatives[0].transcript`. Parsing is best-effort: a
//! payload that does not match the expected shape yields no utterance, and
//! the caller logs the raw payload for diagnosis instead of failing the
//! session.

use serde::Deserialize;
use serde_json::Value;

/// Expected shape of a provider transcript payload.
///
/// Unknown sibling fields (confidence, words, metadata) are ignored.
#[derive(Debug, Deserialize)]
struct TranscriptPayload {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    transcript: String,
}

/// Extract the first alternative's utterance text from a raw payload.
///
/// Returns `None` on any structural mismatch (missing fields, wrong types,
/// empty alternatives list) and for empty utterance text. The provider
/// interleaves empty transcripts between speech segments; forwarding those
/// to the client would print blank lines.
pub fn extract_utterance(payload: &Value) -> Option<String> {
    let parsed: TranscriptPayload = serde_json::from_value(payload.clone()).ok()?;
    let first = parsed.channel.alternatives.into_iter().next()?;

    if first.transcript.is_empty() {
        None
    } else {
        Some(first.transcript)
    }
}
