/// Caller-tunable decode policy. Not part of the archive format itself —
/// this is the ambient configuration layer every reader in this crate
/// consults, the way a parser library exposes knobs without the format
/// dictating them.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Reject archives whose declared `archive_size` exceeds this many
    /// bytes before any band past the header is sized. `None` means no
    /// limit, matching spec.md's documented behavior.
    pub max_archive_size: Option<u64>,

    /// When `true` (the default), a non-zero count for a tag introduced
    /// after the archive's declared version is a fatal
    /// `LegacyFeatureInOldVersion`. When `false`, the count is logged and
    /// treated as zero so the decode can proceed.
    pub strict_legacy: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_archive_size: None,
            strict_legacy: true,
        }
    }
}
