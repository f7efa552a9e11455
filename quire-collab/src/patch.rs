//! Patch engine adapter over `diff-match-patch-rs`.
//!
//! The synchronization core treats text patching as an opaque capability:
//! decode an encoded patch, apply it against a base text, and report which
//! hunks applied. Whether a patch is *committed* is decided by the caller
//! (the coordinator accepts only all-hunks-applied outcomes); this module
//! never touches document state.
//!
//! Patches travel on the wire in the diff-match-patch text format
//! (`@@ -l,s +l,s @@` headers with URI-escaped bodies), the same encoding the
//! sender produced them in; the server re-broadcasts accepted patch text
//! verbatim.

use diff_match_patch_rs::{DiffMatchPatch, Efficient, PatchInput, Patches};

/// A decoded, ready-to-apply set of patch hunks.
///
/// Opaque wrapper so callers never depend on the underlying representation.
#[derive(Debug)]
pub struct PatchSet(Patches<Efficient>);

impl PatchSet {
    /// Number of hunks in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set contains no hunks.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Patch engine errors.
#[derive(Debug, Clone)]
pub enum PatchError {
    /// Encoded patch text is structurally invalid; the request is dropped.
    Malformed(String),
    /// The engine failed internally while diffing or applying.
    Engine(String),
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "Malformed patch: {e}"),
            Self::Engine(e) => write!(f, "Patch engine error: {e}"),
        }
    }
}

impl std::error::Error for PatchError {}

/// Stateless text-patching engine.
///
/// Pure functions only; safe to share across tasks.
pub struct PatchEngine {
    dmp: DiffMatchPatch,
}

impl PatchEngine {
    pub fn new() -> Self {
        Self {
            dmp: DiffMatchPatch::new(),
        }
    }

    /// Parse encoded patch text into a structured patch set.
    ///
    /// Failure here is the `PatchDecodeError` case of the protocol: the
    /// request carrying this text must be dropped without side effects.
    pub fn decode(&self, patch_text: &str) -> Result<PatchSet, PatchError> {
        self.dmp
            .patch_from_text::<Efficient>(patch_text)
            .map(PatchSet)
            .map_err(|e| PatchError::Malformed(format!("{e:?}")))
    }

    /// Apply a patch set to a base text.
    ///
    /// Returns the patched text plus one applicability flag per hunk. The
    /// returned text reflects every hunk that *did* apply; callers deciding
    /// all-or-nothing must discard it unless every flag is true.
    pub fn apply(&self, patches: &PatchSet, base: &str) -> Result<(String, Vec<bool>), PatchError> {
        self.dmp
            .patch_apply(&patches.0, base)
            .map_err(|e| PatchError::Engine(format!("{e:?}")))
    }

    /// Produce encoded patch text transforming `old` into `new`.
    ///
    /// This is the sender side of the protocol (clients and tests); the
    /// server itself only decodes and applies.
    pub fn diff(&self, old: &str, new: &str) -> Result<String, PatchError> {
        let patches = self
            .dmp
            .patch_make(PatchInput::<Efficient>::new_text_text(old, new))
            .map_err(|e| PatchError::Engine(format!("{e:?}")))?;
        Ok(self.dmp.patch_to_text(&patches))
    }
}

impl Default for PatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_apply_roundtrip() {
        let engine = PatchEngine::new();

        let patch_text = engine.diff("", "hello").unwrap();
        let patches = engine.decode(&patch_text).unwrap();
        let (text, results) = engine.apply(&patches, "").unwrap();

        assert_eq!(text, "hello");
        assert!(results.iter().all(|&ok| ok));
    }

    #[test]
    fn test_incremental_edit() {
        let engine = PatchEngine::new();

        let patch_text = engine.diff("hello", "hello world").unwrap();
        let patches = engine.decode(&patch_text).unwrap();
        let (text, results) = engine.apply(&patches, "hello").unwrap();

        assert_eq!(text, "hello world");
        assert!(results.iter().all(|&ok| ok));
    }

    #[test]
    fn test_decode_malformed_patch() {
        let engine = PatchEngine::new();
        let err = engine.decode("this is not a patch").unwrap_err();
        assert!(matches!(err, PatchError::Malformed(_)));
    }

    #[test]
    fn test_decode_empty_patch_text() {
        // Empty patch text decodes to an empty set (a no-op patch).
        let engine = PatchEngine::new();
        let patches = engine.decode("").unwrap();
        assert!(patches.is_empty());
    }

    #[test]
    fn test_stale_base_fails_hunks() {
        let engine = PatchEngine::new();

        // Patch built against a base the document no longer resembles at
        // all, so its hunk context cannot be located even fuzzily.
        let patch_text = engine
            .diff(
                "the quick brown fox jumps over the lazy dog",
                "an utterly rewritten sentence with no overlap whatsoever",
            )
            .unwrap();
        let patches = engine.decode(&patch_text).unwrap();
        let (_, results) = engine
            .apply(&patches, "completely unrelated document contents here")
            .unwrap();

        assert!(results.iter().any(|&ok| !ok));
    }

    #[test]
    fn test_apply_is_pure() {
        let engine = PatchEngine::new();
        let patch_text = engine.diff("abc", "abcd").unwrap();
        let patches = engine.decode(&patch_text).unwrap();

        let (first, _) = engine.apply(&patches, "abc").unwrap();
        let (second, _) = engine.apply(&patches, "abc").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unicode_patch() {
        let engine = PatchEngine::new();
        let patch_text = engine.diff("héllo", "héllo wörld").unwrap();
        let patches = engine.decode(&patch_text).unwrap();
        let (text, results) = engine.apply(&patches, "héllo").unwrap();

        assert_eq!(text, "héllo wörld");
        assert!(results.iter().all(|&ok| ok));
    }
}
