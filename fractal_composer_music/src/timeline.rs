// Tick resolution: turning exact fractional note times into integer ticks.
//
// Renderers (MIDI writers, synthesizers) work in integer ticks per quarter
// note. Every note start and duration is converted to quarter-note units and
// the resolution is the LCM of all their denominators, which is the smallest
// value that places every note exactly on a tick.
//
// Deeply nested self-similarity can push that LCM past what a renderer
// accepts (`max_tick_resolution`, 32767 by default, the largest MIDI
// division). When that happens the whole composition is slowed down by a
// power of two: each halving of the resolution doubles every duration. Only
// even resolutions can be halved. The result is re-validated, and if it is
// still too large generation fails with `TickResolutionOverflow`. The factor
// used is reported as `rescale_factor` so a renderer can raise the tempo to
// compensate.
//
// The output `Timeline` holds only pitched notes; rests become gaps.

use crate::error::MusicError;
use crate::note::{NoteList, VoiceId};
use crate::scale::KeySignature;
use crate::time_signature::TimeSignature;
use fractal_composer_fraction::{Fraction, FractionError, checked_lcm};
use log::{info, warn};
use serde::Serialize;

/// Largest tick resolution a standard MIDI file header can express.
pub const DEFAULT_MAX_TICK_RESOLUTION: i64 = 32767;

/// One channel per voice, as in General MIDI.
pub const MAX_CHANNELS: usize = 16;

/// A pitched note placed on the tick grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimedNote {
    pub start_tick: i64,
    pub duration_ticks: i64,
    pub pitch: u8,
    pub volume: u8,
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceTimeline {
    pub voice: VoiceId,
    pub channel: u8,
    pub instrument: Option<String>,
    pub notes: Vec<TimedNote>,
    /// Length of the voice including trailing rests.
    pub total_ticks: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeySignatureChange {
    pub tick: i64,
    pub key_signature: KeySignature,
}

/// A whole composition on an integer tick grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub ticks_per_quarter: i64,
    /// Power of two every duration was multiplied by to fit the resolution.
    pub rescale_factor: i64,
    pub tempo_bpm: u32,
    pub time_signature: TimeSignature,
    pub key_signatures: Vec<KeySignatureChange>,
    pub voices: Vec<VoiceTimeline>,
}

/// Parameters carried from the piece into the timeline.
#[derive(Debug, Clone, Copy)]
pub struct TimelineSettings {
    pub tempo_bpm: u32,
    pub time_signature: TimeSignature,
    pub max_tick_resolution: i64,
}

/// The resolution chosen for a set of time points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickResolution {
    pub ticks_per_quarter: i64,
    pub rescale_factor: i64,
}

fn to_quarters(whole_notes: Fraction) -> Result<Fraction, FractionError> {
    whole_notes.times(Fraction::from_integer(4))
}

/// LCM of the denominators of `values` (in whole notes) expressed in
/// quarter notes, after multiplying each by `factor`.
fn denominator_lcm(values: &[Fraction], factor: Fraction) -> Result<i64, MusicError> {
    let mut lcm = 1;
    for &value in values {
        let denom = to_quarters(value.times(factor)?)?.denom();
        lcm = checked_lcm(lcm, denom).ok_or(FractionError::Overflow)?;
    }
    Ok(lcm)
}

/// Smallest ticks-per-quarter that puts every value (start or duration, in
/// whole notes) on a tick, rescaling by a power of two if it would exceed
/// `max`.
pub fn tick_resolution(values: &[Fraction], max: i64) -> Result<TickResolution, MusicError> {
    let required = denominator_lcm(values, Fraction::ONE)?;
    if required <= max {
        return Ok(TickResolution {
            ticks_per_quarter: required,
            rescale_factor: 1,
        });
    }

    let mut reduced = required;
    let mut rescale_factor: i64 = 1;
    while reduced > max && reduced % 2 == 0 {
        reduced /= 2;
        rescale_factor *= 2;
    }
    if rescale_factor == 1 {
        return Err(MusicError::TickResolutionOverflow { required, max });
    }

    let rescaled = denominator_lcm(values, Fraction::from_integer(rescale_factor))?;
    if rescaled > max {
        return Err(MusicError::TickResolutionOverflow {
            required: rescaled,
            max,
        });
    }
    warn!(
        "tick resolution {} exceeds {}; slowing durations by a factor of {}",
        required, max, rescale_factor
    );
    Ok(TickResolution {
        ticks_per_quarter: rescaled,
        rescale_factor,
    })
}

/// Convert a whole-note value to ticks. The value must lie on the grid.
fn to_ticks(value: Fraction, resolution: TickResolution) -> Result<i64, MusicError> {
    let quarters = to_quarters(value.times(Fraction::from_integer(resolution.rescale_factor))?)?;
    let ticks = quarters.times(Fraction::from_integer(resolution.ticks_per_quarter))?;
    Ok(ticks.numer())
}

/// Start time of every note of `list`, followed by the list's total length.
fn start_times(list: &NoteList) -> Result<Vec<Fraction>, MusicError> {
    let mut starts = Vec::with_capacity(list.len() + 1);
    let mut now = Fraction::ZERO;
    starts.push(now);
    for note in list {
        now = now.plus(note.duration)?;
        starts.push(now);
    }
    Ok(starts)
}

/// Lay out each voice on one shared tick grid. `voices` are in channel
/// order; `key_changes` are (time in whole notes, key) pairs.
pub fn build_timeline(
    voices: &[(VoiceId, NoteList)],
    key_changes: &[(Fraction, KeySignature)],
    settings: TimelineSettings,
) -> Result<Timeline, MusicError> {
    if voices.len() > MAX_CHANNELS {
        return Err(MusicError::TooManyVoices {
            count: voices.len(),
            max: MAX_CHANNELS,
        });
    }

    let mut grid_points: Vec<Fraction> = key_changes.iter().map(|&(time, _)| time).collect();
    let mut all_starts = Vec::with_capacity(voices.len());
    for (_, list) in voices {
        let starts = start_times(list)?;
        grid_points.extend(starts.iter().copied());
        grid_points.extend(list.iter().map(|n| n.duration));
        all_starts.push(starts);
    }
    let resolution = tick_resolution(&grid_points, settings.max_tick_resolution)?;
    info!(
        "tick resolution: {} per quarter (rescale x{})",
        resolution.ticks_per_quarter, resolution.rescale_factor
    );

    let mut voice_timelines = Vec::with_capacity(voices.len());
    for (channel, ((voice, list), starts)) in voices.iter().zip(&all_starts).enumerate() {
        let channel = channel as u8;
        let mut notes = Vec::new();
        for (note, &start) in list.iter().zip(starts) {
            let Some(pitch) = note.midi_pitch() else {
                continue;
            };
            let pitch = u8::try_from(pitch)
                .ok()
                .filter(|&p| p <= 127)
                .ok_or(MusicError::PitchOutOfRange(pitch))?;
            notes.push(TimedNote {
                start_tick: to_ticks(start, resolution)?,
                duration_ticks: to_ticks(note.duration, resolution)?,
                pitch,
                volume: note.volume,
                channel,
            });
        }
        let end = starts.last().copied().unwrap_or(Fraction::ZERO);
        voice_timelines.push(VoiceTimeline {
            voice: *voice,
            channel,
            instrument: list.instrument.clone(),
            notes,
            total_ticks: to_ticks(end, resolution)?,
        });
    }

    let key_signatures = key_changes
        .iter()
        .map(|&(time, key_signature)| {
            Ok(KeySignatureChange {
                tick: to_ticks(time, resolution)?,
                key_signature,
            })
        })
        .collect::<Result<Vec<_>, MusicError>>()?;

    Ok(Timeline {
        ticks_per_quarter: resolution.ticks_per_quarter,
        rescale_factor: resolution.rescale_factor,
        tempo_bpm: settings.tempo_bpm,
        time_signature: settings.time_signature,
        key_signatures,
        voices: voice_timelines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::germ::parse_note_list;
    use crate::scale::Scale;

    fn frac(n: i64, d: i64) -> Fraction {
        Fraction::new(n, d).unwrap()
    }

    fn settings(max: i64) -> TimelineSettings {
        TimelineSettings {
            tempo_bpm: 90,
            time_signature: TimeSignature::default(),
            max_tick_resolution: max,
        }
    }

    fn one_voice(text: &str, max: i64) -> Result<Timeline, MusicError> {
        let list = parse_note_list(text, Scale::c_major()).unwrap();
        build_timeline(
            &[(VoiceId(0), list)],
            &[(Fraction::ZERO, KeySignature::C_MAJOR)],
            settings(max),
        )
    }

    #[test]
    fn test_resolution_is_lcm_of_quarter_denominators() {
        let timeline = one_voice(
            "C4,1/8 C4,1/4 C4,1/16 C4,3/8 C4,1/3",
            DEFAULT_MAX_TICK_RESOLUTION,
        )
        .unwrap();
        assert_eq!(timeline.ticks_per_quarter, 12);
        assert_eq!(timeline.rescale_factor, 1);

        let notes = &timeline.voices[0].notes;
        let starts: Vec<i64> = notes.iter().map(|n| n.start_tick).collect();
        let lengths: Vec<i64> = notes.iter().map(|n| n.duration_ticks).collect();
        assert_eq!(starts, vec![0, 6, 18, 21, 39]);
        assert_eq!(lengths, vec![6, 12, 3, 18, 16]);
        assert_eq!(timeline.voices[0].total_ticks, 55);
    }

    #[test]
    fn test_quarter_notes_need_one_tick() {
        let timeline = one_voice("C4 D4 E4", DEFAULT_MAX_TICK_RESOLUTION).unwrap();
        assert_eq!(timeline.ticks_per_quarter, 1);
        assert_eq!(timeline.voices[0].total_ticks, 3);
    }

    #[test]
    fn test_rests_become_gaps() {
        let timeline = one_voice("C4,1/4 R,1/8 D4,1/8", DEFAULT_MAX_TICK_RESOLUTION).unwrap();
        let voice = &timeline.voices[0];
        assert_eq!(voice.notes.len(), 2);
        assert_eq!(voice.notes[1].start_tick, 3);
        assert_eq!(voice.notes[1].pitch, 62);
        assert_eq!(voice.total_ticks, 4);
    }

    #[test]
    fn test_rescale_by_power_of_two() {
        let values = [frac(1, 64), frac(1, 64)];
        let resolution = tick_resolution(&values, 8).unwrap();
        assert_eq!(
            resolution,
            TickResolution {
                ticks_per_quarter: 8,
                rescale_factor: 2
            }
        );

        let timeline = one_voice("C4,1/64 D4,1/64", 8).unwrap();
        assert_eq!(timeline.rescale_factor, 2);
        assert_eq!(timeline.ticks_per_quarter, 8);
        let lengths: Vec<i64> = timeline.voices[0]
            .notes
            .iter()
            .map(|n| n.duration_ticks)
            .collect();
        assert_eq!(lengths, vec![1, 1]);
    }

    #[test]
    fn test_odd_resolution_cannot_be_rescaled() {
        let err = tick_resolution(&[frac(1, 3)], 2).unwrap_err();
        assert!(matches!(
            err,
            MusicError::TickResolutionOverflow {
                required: 3,
                max: 2
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Numeric);
    }

    #[test]
    fn test_rescale_still_too_large() {
        // 1/12 whole = 1/3 quarter; 1/8 whole = 1/2 quarter; lcm 6 -> 3 > 2.
        let err = tick_resolution(&[frac(1, 12), frac(1, 8)], 2).unwrap_err();
        assert!(matches!(
            err,
            MusicError::TickResolutionOverflow { required: 3, .. }
        ));
    }

    #[test]
    fn test_pitch_out_of_range() {
        assert!(one_voice("G9,1/4", DEFAULT_MAX_TICK_RESOLUTION).is_ok());
        let err = one_voice("G#9,1/4", DEFAULT_MAX_TICK_RESOLUTION).unwrap_err();
        assert!(matches!(err, MusicError::PitchOutOfRange(128)));
    }

    #[test]
    fn test_channels_follow_voice_order() {
        let a = parse_note_list("C4", Scale::c_major()).unwrap();
        let mut b = parse_note_list("E4", Scale::c_major()).unwrap();
        b.instrument = Some("Flute".to_string());
        let timeline = build_timeline(
            &[(VoiceId(7), a), (VoiceId(3), b)],
            &[(Fraction::ZERO, KeySignature::C_MAJOR)],
            settings(DEFAULT_MAX_TICK_RESOLUTION),
        )
        .unwrap();
        assert_eq!(timeline.voices[0].voice, VoiceId(7));
        assert_eq!(timeline.voices[1].channel, 1);
        assert_eq!(timeline.voices[1].notes[0].channel, 1);
        assert_eq!(timeline.voices[1].instrument.as_deref(), Some("Flute"));
        assert_eq!(timeline.key_signatures[0].tick, 0);
        assert_eq!(timeline.tempo_bpm, 90);
    }
}
