// Note model: single notes, note lists, and where notes came from.
//
// A `Note` is either pitched or a rest. Pitched notes store a `ScalePitch`
// (step + octave + chromatic correction) relative to their `Scale`; the MIDI
// pitch is derived on demand. Durations are exact `Fraction`s of a whole note.
//
// Two pieces of bookkeeping ride along with every note:
// - `first_of_germ_copy` marks the first note of each copy of the germ that
//   self-similarity produced. Retrograde uses it to keep copy boundaries.
// - `source` records which voice-section (or intro/outro layer) produced the
//   note, so that rest merging never joins rests across sources.
//
// `NoteList` is the unit every transformer consumes and produces. It owns its
// notes and an optional instrument name that is passed through untouched.

use crate::error::MusicError;
use crate::scale::Scale;
use fractal_composer_fraction::Fraction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a voice within a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoiceId(pub u32);

/// Identifies a section within a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionId(pub u32);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The part of a voice's sequence a note belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Section(SectionId),
    /// Layer index of the layered intro.
    Intro(u32),
    /// Layer index of the layered outro.
    Outro(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteSource {
    pub voice: VoiceId,
    pub origin: Origin,
}

impl NoteSource {
    pub fn section(voice: VoiceId, section: SectionId) -> Self {
        NoteSource {
            voice,
            origin: Origin::Section(section),
        }
    }

    pub fn intro_layer(voice: VoiceId, layer: u32) -> Self {
        NoteSource {
            voice,
            origin: Origin::Intro(layer),
        }
    }

    pub fn outro_layer(voice: VoiceId, layer: u32) -> Self {
        NoteSource {
            voice,
            origin: Origin::Outro(layer),
        }
    }
}

/// Named dynamic levels and their MIDI volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Dynamic {
    PPP,
    PP,
    P,
    MP,
    #[default]
    MF,
    F,
    FF,
    FFF,
}

impl Dynamic {
    pub const ALL: [Dynamic; 8] = [
        Dynamic::PPP,
        Dynamic::PP,
        Dynamic::P,
        Dynamic::MP,
        Dynamic::MF,
        Dynamic::F,
        Dynamic::FF,
        Dynamic::FFF,
    ];

    pub fn volume(self) -> u8 {
        match self {
            Dynamic::PPP => 16,
            Dynamic::PP => 33,
            Dynamic::P => 49,
            Dynamic::MP => 64,
            Dynamic::MF => 80,
            Dynamic::F => 96,
            Dynamic::FF => 112,
            Dynamic::FFF => 127,
        }
    }

    /// Case-insensitive lookup by marking (`"mf"`, `"FFF"`).
    pub fn from_name(name: &str) -> Option<Dynamic> {
        Dynamic::ALL
            .into_iter()
            .find(|d| format!("{d:?}").eq_ignore_ascii_case(name))
    }
}

/// Position of a pitched note within its scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScalePitch {
    /// Index into the scale's semitone pattern. May fall outside the pattern,
    /// in which case it carries into the octave.
    pub step: i32,
    /// Octave of the scale's tonic (C major step 0, octave 4 is middle C).
    pub octave: i32,
    /// Semitone correction independent of the scale.
    pub chromatic: i32,
    /// Extra semitones inherited from the segment note this pitch was copied
    /// onto, kept apart from the note's own correction.
    pub segment_chromatic: i32,
}

impl ScalePitch {
    pub fn new(step: i32, octave: i32, chromatic: i32) -> Self {
        ScalePitch {
            step,
            octave,
            chromatic,
            segment_chromatic: 0,
        }
    }

    /// Both chromatic corrections together, in semitones.
    pub fn total_chromatic(self) -> i32 {
        self.chromatic + self.segment_chromatic
    }

    pub fn is_altered(self) -> bool {
        self.chromatic != 0 || self.segment_chromatic != 0
    }

    /// `octave * steps_per_octave + step`: a single number that increases by
    /// one per scale step.
    pub fn absolute_step(self, steps_per_octave: i32) -> i32 {
        self.octave * steps_per_octave + self.step
    }

    /// Inverse of `absolute_step`, normalizing `step` into `0..steps_per_octave`.
    /// The segment correction starts at zero.
    pub fn from_absolute_step(absolute: i32, steps_per_octave: i32, chromatic: i32) -> Self {
        ScalePitch::new(
            absolute.rem_euclid(steps_per_octave),
            absolute.div_euclid(steps_per_octave),
            chromatic,
        )
    }

    pub fn with_segment_chromatic(self, segment_chromatic: i32) -> Self {
        ScalePitch {
            segment_chromatic,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// `None` for a rest.
    pub pitch: Option<ScalePitch>,
    pub scale: Scale,
    /// In whole notes.
    pub duration: Fraction,
    /// MIDI volume, 0 for rests.
    pub volume: u8,
    pub first_of_germ_copy: bool,
    pub source: Option<NoteSource>,
}

impl Note {
    pub fn pitched(pitch: ScalePitch, scale: Scale, duration: Fraction, volume: u8) -> Self {
        Note {
            pitch: Some(pitch),
            scale,
            duration,
            volume: volume.min(127),
            first_of_germ_copy: false,
            source: None,
        }
    }

    pub fn rest(duration: Fraction) -> Self {
        Note {
            pitch: None,
            scale: Scale::default(),
            duration,
            volume: 0,
            first_of_germ_copy: false,
            source: None,
        }
    }

    pub fn is_rest(&self) -> bool {
        self.pitch.is_none()
    }

    /// MIDI pitch, or `None` for a rest. Not range-checked.
    pub fn midi_pitch(&self) -> Option<i32> {
        self.pitch.map(|p| self.scale.midi_pitch(p))
    }

    pub fn absolute_step(&self) -> Option<i32> {
        self.pitch
            .map(|p| p.absolute_step(self.scale.steps_per_octave()))
    }
}

/// An ordered sequence of notes plus an optional instrument name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NoteList {
    pub notes: Vec<Note>,
    pub instrument: Option<String>,
}

impl NoteList {
    pub fn new(notes: Vec<Note>) -> Self {
        NoteList {
            notes,
            instrument: None,
        }
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Note> {
        self.notes.iter()
    }

    /// Sum of all note durations, rests included.
    pub fn duration(&self) -> Result<Fraction, MusicError> {
        Ok(Fraction::sum(self.notes.iter().map(|n| n.duration))?)
    }

    pub fn first_audible(&self) -> Option<&Note> {
        self.notes.iter().find(|n| !n.is_rest())
    }

    /// The scale shared by every pitched note, `None` if there are no pitched
    /// notes, or `InconsistentScales` if they disagree.
    pub fn shared_scale(&self) -> Result<Option<Scale>, MusicError> {
        let mut shared = None;
        for note in self.notes.iter().filter(|n| !n.is_rest()) {
            match shared {
                None => shared = Some(note.scale),
                Some(scale) if scale != note.scale => return Err(MusicError::InconsistentScales),
                Some(_) => {}
            }
        }
        Ok(shared)
    }

    /// Copy with each run of adjacent rests from the same source merged into
    /// one fresh rest that keeps only the source. Rests lose their
    /// germ-copy flag. A single-note list is returned as is.
    pub fn normalized_rests(&self) -> Result<NoteList, MusicError> {
        if self.notes.len() <= 1 {
            return Ok(self.clone());
        }
        let mut notes: Vec<Note> = Vec::with_capacity(self.notes.len());
        for note in &self.notes {
            if !note.is_rest() {
                notes.push(note.clone());
                continue;
            }
            match notes.last_mut() {
                Some(last) if last.is_rest() && last.source == note.source => {
                    last.duration = last.duration.plus(note.duration)?;
                }
                _ => {
                    let mut rest = Note::rest(note.duration);
                    rest.source = note.source;
                    notes.push(rest);
                }
            }
        }
        Ok(NoteList {
            notes,
            instrument: self.instrument.clone(),
        })
    }

    /// Copy with every note reinterpreted in `scale`: steps, octaves and
    /// chromatic corrections are kept, so G A B in G major becomes C D Eb in
    /// C minor.
    pub fn with_scale(&self, scale: Scale) -> NoteList {
        let mut out = self.clone();
        for note in &mut out.notes {
            note.scale = scale;
        }
        out
    }

    /// Number of notes with a chromatic or segment correction.
    pub fn number_of_accidentals(&self) -> usize {
        self.notes
            .iter()
            .filter(|n| n.pitch.is_some_and(ScalePitch::is_altered))
            .count()
    }

    pub fn set_source_on_all(&mut self, source: NoteSource) {
        for note in &mut self.notes {
            note.source = Some(source);
        }
    }

    /// Flag the notes at `indices` as copy starts and clear every other flag.
    pub fn set_first_notes_of_germ_copy(&mut self, indices: &[usize]) {
        for (i, note) in self.notes.iter_mut().enumerate() {
            note.first_of_germ_copy = indices.contains(&i);
        }
    }

    /// MIDI pitch of every note, `None` for rests.
    pub fn midi_pitches(&self) -> Vec<Option<i32>> {
        self.notes.iter().map(Note::midi_pitch).collect()
    }

    pub fn durations(&self) -> Vec<Fraction> {
        self.notes.iter().map(|n| n.duration).collect()
    }
}

impl FromIterator<Note> for NoteList {
    fn from_iter<I: IntoIterator<Item = Note>>(iter: I) -> Self {
        NoteList::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a NoteList {
    type Item = &'a Note;
    type IntoIter = std::slice::Iter<'a, Note>;

    fn into_iter(self) -> Self::IntoIter {
        self.notes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::{NoteName, ScaleKind};

    fn frac(n: i64, d: i64) -> Fraction {
        Fraction::new(n, d).unwrap()
    }

    fn c(step: i32, duration: Fraction) -> Note {
        Note::pitched(ScalePitch::new(step, 4, 0), Scale::c_major(), duration, 80)
    }

    #[test]
    fn test_dynamics() {
        assert_eq!(Dynamic::default().volume(), 80);
        assert_eq!(Dynamic::from_name("fff"), Some(Dynamic::FFF));
        assert_eq!(Dynamic::from_name("Mp").map(Dynamic::volume), Some(64));
        assert_eq!(Dynamic::from_name("loud"), None);
        let volumes: Vec<u8> = Dynamic::ALL.iter().map(|d| d.volume()).collect();
        assert!(volumes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_rest_has_no_pitch_and_zero_volume() {
        let rest = Note::rest(frac(1, 8));
        assert!(rest.is_rest());
        assert_eq!(rest.volume, 0);
        assert_eq!(rest.midi_pitch(), None);
        assert_eq!(rest.absolute_step(), None);
    }

    #[test]
    fn test_duration_and_first_audible() {
        let list = NoteList::new(vec![
            Note::rest(frac(1, 8)),
            c(2, frac(1, 4)),
            c(0, frac(1, 8)),
        ]);
        assert_eq!(list.duration().unwrap(), frac(1, 2));
        assert_eq!(list.first_audible().and_then(Note::midi_pitch), Some(64));
        assert!(NoteList::default().first_audible().is_none());
        assert_eq!(NoteList::default().duration().unwrap(), Fraction::ZERO);
    }

    #[test]
    fn test_shared_scale() {
        let g_major = Scale::new(ScaleKind::Major, "G".parse::<NoteName>().unwrap()).unwrap();
        let mut list = NoteList::new(vec![Note::rest(frac(1, 4)), c(0, frac(1, 4))]);
        assert_eq!(list.shared_scale().unwrap(), Some(Scale::c_major()));

        list.notes
            .push(Note::pitched(ScalePitch::default(), g_major, frac(1, 4), 80));
        assert!(matches!(
            list.shared_scale(),
            Err(MusicError::InconsistentScales)
        ));

        let rests_only = NoteList::new(vec![Note::rest(frac(1, 4))]);
        assert_eq!(rests_only.shared_scale().unwrap(), None);
    }

    #[test]
    fn test_normalized_rests_merge_only_same_source() {
        let a = NoteSource::section(VoiceId(0), SectionId(0));
        let b = NoteSource::section(VoiceId(0), SectionId(1));
        let mut rest_a = Note::rest(frac(1, 8));
        rest_a.source = Some(a);
        let mut rest_b = Note::rest(frac(1, 8));
        rest_b.source = Some(b);
        let mut pitched = c(0, frac(1, 4));
        pitched.source = Some(b);

        let list = NoteList::new(vec![
            rest_a.clone(),
            rest_a.clone(),
            rest_b.clone(),
            rest_b.clone(),
            rest_b.clone(),
            pitched,
            rest_b.clone(),
        ]);
        let normalized = list.normalized_rests().unwrap();
        assert_eq!(
            normalized.durations(),
            vec![frac(1, 4), frac(3, 8), frac(1, 4), frac(1, 8)]
        );
        assert_eq!(normalized.notes[0].source, Some(a));
        assert_eq!(normalized.notes[1].source, Some(b));
        assert_eq!(
            normalized.duration().unwrap(),
            list.duration().unwrap()
        );
    }

    #[test]
    fn test_normalized_rests_are_fresh() {
        let mut flagged = Note::rest(frac(1, 8));
        flagged.first_of_germ_copy = true;
        let mut first = c(0, frac(1, 4));
        first.first_of_germ_copy = true;
        let list = NoteList::new(vec![first, flagged.clone(), flagged.clone()]);

        let normalized = list.normalized_rests().unwrap();
        assert_eq!(normalized.durations(), vec![frac(1, 4), frac(1, 4)]);
        assert!(normalized.notes[0].first_of_germ_copy);
        assert!(!normalized.notes[1].first_of_germ_copy);
        assert_eq!(normalized.notes[1], Note::rest(frac(1, 4)));

        let alone = NoteList::new(vec![flagged]);
        assert_eq!(alone.normalized_rests().unwrap(), alone);
    }

    #[test]
    fn test_with_scale_keeps_steps() {
        let g_major = Scale::new(ScaleKind::Major, "G".parse::<NoteName>().unwrap()).unwrap();
        let c_minor = Scale::new(ScaleKind::NaturalMinor, NoteName::C).unwrap();
        let list: NoteList = [0, 1, 2, 0]
            .into_iter()
            .map(|s| Note::pitched(ScalePitch::new(s, 4, 0), g_major, frac(1, 4), 80))
            .collect();
        assert_eq!(
            list.midi_pitches(),
            vec![Some(67), Some(69), Some(71), Some(67)]
        );
        assert_eq!(
            list.with_scale(c_minor).midi_pitches(),
            vec![Some(60), Some(62), Some(63), Some(60)]
        );
    }

    #[test]
    fn test_number_of_accidentals() {
        let mut sharp = c(3, frac(1, 4));
        sharp.pitch = Some(ScalePitch::new(3, 4, 1));
        let list = NoteList::new(vec![c(0, frac(1, 4)), sharp, Note::rest(frac(1, 4))]);
        assert_eq!(list.number_of_accidentals(), 1);

        // Raised only by its segment, and a flat cancelled by its segment:
        // both still count.
        let mut raised = c(0, frac(1, 4));
        raised.pitch = Some(ScalePitch::new(0, 4, 0).with_segment_chromatic(1));
        let mut cancelled = c(1, frac(1, 4));
        cancelled.pitch = Some(ScalePitch::new(1, 4, -1).with_segment_chromatic(1));
        assert_eq!(raised.midi_pitch(), Some(61));
        assert_eq!(cancelled.midi_pitch(), Some(62));
        let list = NoteList::new(vec![raised, cancelled, c(2, frac(1, 4))]);
        assert_eq!(list.number_of_accidentals(), 2);
    }

    #[test]
    fn test_set_first_notes_of_germ_copy() {
        let mut list: NoteList = (0..4).map(|s| c(s, frac(1, 4))).collect();
        list.notes[1].first_of_germ_copy = true;
        list.set_first_notes_of_germ_copy(&[0, 2]);
        let flags: Vec<bool> = list.iter().map(|n| n.first_of_germ_copy).collect();
        assert_eq!(flags, vec![true, false, true, false]);
    }

    #[test]
    fn test_absolute_step_round_trip() {
        let pitch = ScalePitch::new(-2, 4, 1);
        let absolute = pitch.absolute_step(7);
        assert_eq!(absolute, 26);
        assert_eq!(
            ScalePitch::from_absolute_step(absolute, 7, 1),
            ScalePitch::new(5, 3, 1)
        );
    }
}
