// Self-similarity expansion: the core of the fractal generator.
//
// One iteration replaces every note of the germ with a *segment*. A rest
// becomes a single rest; a pitched note becomes a whole copy of the germ,
// transposed so the copy starts where that note sits relative to the germ's
// first audible note, with its durations shrunk so the copy fits in the time
// that note occupied, and (optionally) its volumes scaled by that note's
// loudness. The output of each iteration is the germ of the next, so every
// level of the result mirrors the shape of the whole.
//
// Which of pitch, rhythm and volume are mirrored is controlled by
// `SelfSimilaritySettings`. With rhythm applied the total duration never
// changes; without it every iteration multiplies the duration by the number
// of notes in the germ.
//
// A copy moved onto an altered segment note keeps that alteration apart, in
// each copied pitch's segment correction. Altered notes inside a moved copy
// are first written on the neighbouring step their accidental points to. In
// C major an F# inside a copy moved up a fourth is spelled G flat, so it
// lands on C flat (sounding B) rather than B sharp.
//
// The expansion is an explicit loop. Each iteration builds a fresh owned list
// and drops the previous one. Growth is geometric, so an iteration whose
// output would exceed `MAX_NOTES` is refused before anything is allocated.

use crate::error::MusicError;
use crate::note::{Note, NoteList, ScalePitch};
use crate::transform::Transformer;
use fractal_composer_fraction::Fraction;
use log::debug;
use serde::{Deserialize, Serialize};

/// Most notes a single iteration may produce.
pub const MAX_NOTES: usize = 1 << 20;

/// Which aspects of the germ are mirrored, and how many times to recurse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfSimilaritySettings {
    pub apply_to_pitch: bool,
    pub apply_to_rhythm: bool,
    pub apply_to_volume: bool,
    pub iterations: u32,
}

impl SelfSimilaritySettings {
    pub fn new(
        apply_to_pitch: bool,
        apply_to_rhythm: bool,
        apply_to_volume: bool,
        iterations: u32,
    ) -> Self {
        SelfSimilaritySettings {
            apply_to_pitch,
            apply_to_rhythm,
            apply_to_volume,
            iterations,
        }
    }
}

impl Default for SelfSimilaritySettings {
    fn default() -> Self {
        SelfSimilaritySettings::new(false, false, false, 1)
    }
}

/// Runs the self-similarity expansion as a `Transformer`.
#[derive(Debug, Clone, Copy)]
pub struct SelfSimilarityTransformer {
    pub settings: SelfSimilaritySettings,
}

impl SelfSimilarityTransformer {
    pub fn new(settings: SelfSimilaritySettings) -> Self {
        SelfSimilarityTransformer { settings }
    }
}

impl Transformer for SelfSimilarityTransformer {
    fn transform(&self, input: &NoteList) -> Result<NoteList, MusicError> {
        let settings = self.settings;
        if input.is_empty() {
            return Err(MusicError::EmptyGerm);
        }
        if settings.iterations < 1 {
            return Err(MusicError::InvalidIterations(settings.iterations));
        }
        if !input.duration()?.is_positive() {
            return Err(MusicError::ZeroDurationGerm);
        }
        if settings.apply_to_pitch {
            input.shared_scale()?;
        }

        let mut current = input.clone();
        for iteration in 1..=settings.iterations {
            let notes = expanded_len(&current);
            if notes > MAX_NOTES {
                return Err(MusicError::TooManyNotes { iteration, notes });
            }
            current = expand_once(&current, settings).map_err(|source| MusicError::Iteration {
                iteration,
                source: Box::new(source),
            })?;
            debug!(
                "self-similarity iteration {}/{}: {} notes",
                iteration,
                settings.iterations,
                current.len()
            );
        }
        Ok(current)
    }
}

/// Shorthand for `SelfSimilarityTransformer::new(settings).transform(germ)`.
pub fn expand(germ: &NoteList, settings: SelfSimilaritySettings) -> Result<NoteList, MusicError> {
    SelfSimilarityTransformer::new(settings).transform(germ)
}

/// Length of one iteration's output: a rest stays one rest, every pitched
/// note becomes a whole copy. Saturates instead of overflowing.
fn expanded_len(germ: &NoteList) -> usize {
    let rests = germ.iter().filter(|n| n.is_rest()).count();
    (germ.len() - rests)
        .checked_mul(germ.len())
        .and_then(|n| n.checked_add(rests))
        .unwrap_or(usize::MAX)
}

/// Midpoint of the pitched volumes, doubled so it stays an integer.
fn doubled_volume_midpoint(germ: &NoteList) -> u32 {
    let volumes = germ.iter().filter(|n| !n.is_rest()).map(|n| n.volume);
    match (volumes.clone().min(), volumes.max()) {
        (Some(lo), Some(hi)) => u32::from(lo) + u32::from(hi),
        _ => 0,
    }
}

/// `round(volume * target / midpoint)` clamped to the MIDI range, where
/// `doubled_mid` is twice the midpoint. Unchanged when the midpoint is 0.
fn scale_volume(volume: u8, target: u8, doubled_mid: u32) -> u8 {
    if doubled_mid == 0 {
        return volume;
    }
    let numer = 2 * u32::from(volume) * u32::from(target);
    let rounded = (2 * numer + doubled_mid) / (2 * doubled_mid);
    rounded.min(127) as u8
}

fn expand_once(germ: &NoteList, settings: SelfSimilaritySettings) -> Result<NoteList, MusicError> {
    let total = germ.duration()?;
    let first = germ.first_audible().and_then(|n| n.pitch);
    let doubled_mid = doubled_volume_midpoint(germ);

    let mut notes: Vec<Note> = Vec::with_capacity(expanded_len(germ));
    for segment_note in germ.iter() {
        let factor = if settings.apply_to_rhythm {
            segment_note.duration.divided_by(total)?
        } else {
            Fraction::ONE
        };

        let Some(segment_pitch) = segment_note.pitch else {
            let mut rest = segment_note.clone();
            rest.duration = total.times(factor)?;
            rest.first_of_germ_copy = true;
            notes.push(rest);
            continue;
        };

        let len = segment_note.scale.steps_per_octave();
        let (step_offset, chromatic_offset) = match (settings.apply_to_pitch, first) {
            (true, Some(first)) => (
                segment_pitch.absolute_step(len) - first.absolute_step(len),
                segment_pitch.total_chromatic() - first.total_chromatic(),
            ),
            _ => (0, 0),
        };

        let segment_start = notes.len();
        for note in germ.iter() {
            let mut copy = note.clone();
            copy.first_of_germ_copy = false;
            if settings.apply_to_rhythm {
                copy.duration = copy.duration.times(factor)?;
            }
            if let Some(pitch) = copy.pitch {
                if step_offset != 0 || chromatic_offset != 0 {
                    let spelled = copy.scale.respell_toward_accidental(pitch);
                    copy.pitch = Some(
                        ScalePitch::from_absolute_step(
                            spelled.absolute_step(len) + step_offset,
                            len,
                            spelled.chromatic,
                        )
                        .with_segment_chromatic(spelled.segment_chromatic + chromatic_offset),
                    );
                }
                if settings.apply_to_volume {
                    copy.volume = scale_volume(copy.volume, segment_note.volume, doubled_mid);
                }
            }
            notes.push(copy);
        }
        notes[segment_start].first_of_germ_copy = true;
    }

    Ok(NoteList {
        notes,
        instrument: germ.instrument.clone(),
    })
}
