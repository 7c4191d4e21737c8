// Error taxonomy for the music crate.
//
// Every fallible operation returns `MusicError`. Each variant belongs to one
// of four kinds (see `ErrorKind`) so callers can tell a malformed germ string
// apart from an impossible configuration or a composition whose timing cannot
// be represented. The two context wrappers (`Iteration`, `VoiceSection`) say
// *where* a failure happened and report the kind of the error they wrap.

use crate::note::{SectionId, VoiceId};
use fractal_composer_fraction::FractionError;

/// Broad classification of a `MusicError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input has the wrong shape (empty germ, unknown voice, ...).
    Structural,
    /// Exact arithmetic or tick resolution failed.
    Numeric,
    /// A key, time signature, or config file is invalid.
    Configuration,
    /// A germ string could not be parsed.
    Parse,
}

#[derive(Debug, thiserror::Error)]
pub enum MusicError {
    #[error("germ has no notes")]
    EmptyGerm,
    #[error("iteration count must be at least 1, got {0}")]
    InvalidIterations(u32),
    #[error("germ has zero total duration")]
    ZeroDurationGerm,
    #[error("pitched notes do not share one scale")]
    InconsistentScales,
    #[error("duration factor must be positive, got {0}")]
    NonPositiveFactor(String),
    #[error("unknown voice {0}")]
    UnknownVoice(VoiceId),
    #[error("unknown section {0}")]
    UnknownSection(SectionId),
    #[error("{count} voices requested, at most {max} are supported")]
    TooManyVoices { count: usize, max: usize },

    #[error(transparent)]
    Arithmetic(#[from] FractionError),
    #[error("tick resolution {required} exceeds the maximum of {max}")]
    TickResolutionOverflow { required: i64, max: i64 },
    #[error("pitch {0} is outside the MIDI range 0..=127")]
    PitchOutOfRange(i32),
    #[error(
        "self-similarity iteration {iteration} would produce {notes} notes, more than {max}",
        max = crate::self_similarity::MAX_NOTES
    )]
    TooManyNotes { iteration: u32, notes: usize },

    #[error("invalid key signature: {0}")]
    InvalidKeySignature(String),
    #[error("invalid time signature: {0}")]
    InvalidTimeSignature(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse note '{token}': {reason}")]
    NoteParse { token: String, reason: String },

    #[error("self-similarity iteration {iteration}: {source}")]
    Iteration {
        iteration: u32,
        #[source]
        source: Box<MusicError>,
    },
    #[error("voice {voice}, section {section}: {source}")]
    VoiceSection {
        voice: VoiceId,
        section: SectionId,
        #[source]
        source: Box<MusicError>,
    },
}

impl MusicError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MusicError::EmptyGerm
            | MusicError::InvalidIterations(_)
            | MusicError::ZeroDurationGerm
            | MusicError::InconsistentScales
            | MusicError::NonPositiveFactor(_)
            | MusicError::UnknownVoice(_)
            | MusicError::UnknownSection(_)
            | MusicError::TooManyVoices { .. } => ErrorKind::Structural,
            MusicError::Arithmetic(_)
            | MusicError::TickResolutionOverflow { .. }
            | MusicError::PitchOutOfRange(_)
            | MusicError::TooManyNotes { .. } => ErrorKind::Numeric,
            MusicError::InvalidKeySignature(_)
            | MusicError::InvalidTimeSignature(_)
            | MusicError::Config(_)
            | MusicError::Io(_) => ErrorKind::Configuration,
            MusicError::NoteParse { .. } => ErrorKind::Parse,
            MusicError::Iteration { source, .. } | MusicError::VoiceSection { source, .. } => {
                source.kind()
            }
        }
    }

    pub(crate) fn note_parse(token: &str, reason: impl Into<String>) -> Self {
        MusicError::NoteParse {
            token: token.to_string(),
            reason: reason.into(),
        }
    }
}
