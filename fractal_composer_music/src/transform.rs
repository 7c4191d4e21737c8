// Note-list transformers.
//
// Each transformer is a pure function from a `NoteList` to a new `NoteList`;
// inputs are never mutated. The self-similarity engine (self_similarity.rs)
// is built from the same trait, and piece.rs composes the simple ones to
// derive each voice's modified germ and to apply a section's structural
// transform.
//
// - Copy: identity (deep clone).
// - Octave: shift pitched notes by whole octaves.
// - RhythmicDuration: multiply every duration by a positive exact factor.
// - Retrograde: reverse the order, keeping germ-copy boundaries intact.
// - Inversion: mirror pitches around an axis, in scale steps.
// - RetrogradeInversion: inversion then retrograde.

use crate::error::MusicError;
use crate::note::{NoteList, ScalePitch};
use fractal_composer_fraction::Fraction;
use serde::{Deserialize, Serialize};

pub trait Transformer {
    fn transform(&self, input: &NoteList) -> Result<NoteList, MusicError>;
}

/// Returns an identical copy of the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyTransformer;

impl Transformer for CopyTransformer {
    fn transform(&self, input: &NoteList) -> Result<NoteList, MusicError> {
        Ok(input.clone())
    }
}

/// Moves every pitched note by a number of octaves (negative moves down).
#[derive(Debug, Clone, Copy)]
pub struct OctaveTransformer {
    pub octaves: i32,
}

impl OctaveTransformer {
    pub fn new(octaves: i32) -> Self {
        OctaveTransformer { octaves }
    }
}

impl Transformer for OctaveTransformer {
    fn transform(&self, input: &NoteList) -> Result<NoteList, MusicError> {
        let mut out = input.clone();
        for pitch in out.notes.iter_mut().filter_map(|n| n.pitch.as_mut()) {
            pitch.octave += self.octaves;
        }
        Ok(out)
    }
}

/// Scales every duration by an exact positive factor.
#[derive(Debug, Clone, Copy)]
pub struct RhythmicDurationTransformer {
    factor: Fraction,
}

impl RhythmicDurationTransformer {
    pub fn new(factor: Fraction) -> Result<Self, MusicError> {
        if !factor.is_positive() {
            return Err(MusicError::NonPositiveFactor(factor.to_string()));
        }
        Ok(RhythmicDurationTransformer { factor })
    }

    pub fn factor(&self) -> Fraction {
        self.factor
    }
}

impl Transformer for RhythmicDurationTransformer {
    fn transform(&self, input: &NoteList) -> Result<NoteList, MusicError> {
        let mut out = input.clone();
        for note in &mut out.notes {
            note.duration = note.duration.times(self.factor)?;
        }
        Ok(out)
    }
}

/// Reverses note order.
///
/// A run of rests belongs to the note after it, and reversing each
/// (rests, note) unit as a whole is the same as reversing every note, so this
/// is a plain reversal. The germ-copy flags are then moved so they still mark
/// where each copy begins: output note `j >= 1` is flagged when input note
/// `n - j` was, and output note 0 keeps input note 0's flag. Applying the
/// transform twice restores the input exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrogradeTransformer;

impl Transformer for RetrogradeTransformer {
    fn transform(&self, input: &NoteList) -> Result<NoteList, MusicError> {
        let n = input.len();
        let mut out = input.clone();
        out.notes.reverse();
        for (j, note) in out.notes.iter_mut().enumerate() {
            let boundary = if j == 0 { 0 } else { n - j };
            note.first_of_germ_copy = input.notes[boundary].first_of_germ_copy;
        }
        Ok(out)
    }
}

/// Mirrors pitches around an axis: a note `k` scale steps above the axis
/// ends up `k` steps below it, and both chromatic corrections are mirrored too.
/// Without an explicit axis the input's first audible note is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct InversionTransformer {
    pub axis: Option<ScalePitch>,
}

impl InversionTransformer {
    pub fn about_first_note() -> Self {
        InversionTransformer { axis: None }
    }

    pub fn about(axis: ScalePitch) -> Self {
        InversionTransformer { axis: Some(axis) }
    }
}

impl Transformer for InversionTransformer {
    fn transform(&self, input: &NoteList) -> Result<NoteList, MusicError> {
        let Some(scale) = input.shared_scale()? else {
            return Ok(input.clone());
        };
        let axis = match self.axis {
            Some(axis) => axis,
            None => match input.first_audible().and_then(|n| n.pitch) {
                Some(pitch) => pitch,
                None => return Ok(input.clone()),
            },
        };
        let len = scale.steps_per_octave();
        let axis_step = axis.absolute_step(len);

        let mut out = input.clone();
        for pitch in out.notes.iter_mut().filter_map(|n| n.pitch.as_mut()) {
            *pitch = ScalePitch::from_absolute_step(
                2 * axis_step - pitch.absolute_step(len),
                len,
                2 * axis.chromatic - pitch.chromatic,
            )
            .with_segment_chromatic(2 * axis.segment_chromatic - pitch.segment_chromatic);
        }
        Ok(out)
    }
}

/// Inversion followed by retrograde.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrogradeInversionTransformer {
    pub axis: Option<ScalePitch>,
}

impl Transformer for RetrogradeInversionTransformer {
    fn transform(&self, input: &NoteList) -> Result<NoteList, MusicError> {
        let inverted = InversionTransformer { axis: self.axis }.transform(input)?;
        RetrogradeTransformer.transform(&inverted)
    }
}

/// The structural transform a section applies to its self-similar result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SectionTransform {
    #[default]
    None,
    Inversion,
    Retrograde,
    RetrogradeInversion,
}

impl SectionTransform {
    pub fn apply(self, input: &NoteList) -> Result<NoteList, MusicError> {
        match self {
            SectionTransform::None => CopyTransformer.transform(input),
            SectionTransform::Inversion => InversionTransformer::about_first_note().transform(input),
            SectionTransform::Retrograde => RetrogradeTransformer.transform(input),
            SectionTransform::RetrogradeInversion => {
                RetrogradeInversionTransformer::default().transform(input)
            }
        }
    }
}
