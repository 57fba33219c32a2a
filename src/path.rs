//! Steps and keys.
//!
//! A [`Step`] is one opaque path element; a [`Key`] is an ordered sequence
//! of steps addressing a leaf through the node tree. Steps carry their own
//! canonical byte encoding because node serialization (and therefore node
//! identity) depends on it.

use std::fmt::Debug;

use crate::wire::DecodeError;

/// Capability trait for path elements.
///
/// The `Ord` impl is the comparator that fixes edge ordering inside nodes;
/// `encode` must be injective so distinct steps never collide in the
/// canonical node serialization.
pub trait Step: Ord + Eq + Clone + Debug + Send + Sync + 'static {
    fn encode(&self, out: &mut Vec<u8>);

    /// Decodes a step from the exact bytes `encode` produced.
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;
}

impl Step for String {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::BadStep)
    }
}

/// An ordered sequence of steps.
pub type Key<S> = Vec<S>;

/// Builds a key from string-ish segments; convenience for `String` steps.
pub fn key<I, T>(segments: I) -> Key<String>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    segments.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_step_roundtrip() {
        let step = "a/b c".to_string();
        let mut out = Vec::new();
        step.encode(&mut out);
        assert_eq!(String::decode(&out).unwrap(), step);
    }

    #[test]
    fn string_step_rejects_bad_utf8() {
        assert_eq!(String::decode(&[0xFF, 0xFE]), Err(DecodeError::BadStep));
    }
}
