use thiserror::Error;

pub type Result<A, E = Error> = std::result::Result<A, E>;

/// Offset bookkeeping attached to a failure: every fatal error reports how
/// much of the limited buffer had been served, how much sat in its internal
/// buffer, and what limit (if any) was active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostic {
    pub served: u64,
    pub buffered: usize,
    pub limit: Option<u64>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.limit {
            Some(limit) => write!(
                f,
                "served={} buffered={} limit={}",
                self.served, self.buffered, limit
            ),
            None => write!(f, "served={} buffered={} limit=unlimited", self.served, self.buffered),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("magic mismatch: expected {expected:02x?}, found {found:02x?}")]
    MagicMismatch { expected: [u8; 4], found: [u8; 4] },

    #[error("unsupported archive version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("legacy feature used in archive declared as version {major}.{minor}: {feature}")]
    LegacyFeatureInOldVersion {
        feature: &'static str,
        major: u16,
        minor: u16,
    },

    #[error("bad attribute layout for context {context}: {reason}")]
    BadLayout { context: &'static str, reason: String },

    #[error("holder claims attribute index {index} with no matching layout in context {context}")]
    BadAttrIndex { context: &'static str, index: u32 },

    #[error("opcode {opcode:#04x} expected a {expected} reference but found {found}")]
    OpcodeReferenceTagMismatch {
        opcode: u8,
        expected: &'static str,
        found: &'static str,
    },

    #[error("illegal opcode {0:#04x}")]
    IllegalOpcode(u8),

    #[error("truncated stream while filling band `{band}` ({diag})")]
    TruncatedStream { band: &'static str, diag: Diagnostic },

    #[error("declared archive_size does not match bytes served ({diag})")]
    SizeMismatch { diag: Diagnostic },

    #[error("attempted to skip on the limited buffer, which is unsupported")]
    IllegalSkip,

    #[error("band `{band}` finished with {served} of {expected} values disbursed")]
    BandNotDone {
        band: &'static str,
        served: u32,
        expected: u32,
    },

    #[error("archive exceeds configured maximum size ({declared} > {max})")]
    ArchiveTooLarge { declared: u64, max: u64 },

    #[error("reference band `{band}` index {index} does not resolve to a pool entry")]
    DanglingReference { band: &'static str, index: u32 },

    #[error("coded integer overflowed while decoding")]
    CodingOverflow,

    #[error("archive declares {size} bytes of band_headers coding overrides, which this reader does not apply")]
    UnsupportedBandHeaderOverride { size: usize },
}
