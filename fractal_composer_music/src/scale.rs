// Scales, note names, and key signatures.
//
// Notes store their pitch as a position in a scale (step + octave + explicit
// chromatic correction) rather than as a raw MIDI number, so that
// transformations like inversion and self-similar transposition move by scale
// steps and stay in key. This module owns the mapping from that position to a
// MIDI pitch and back.
//
// A `Scale` is a `ScaleKind` plus a key (`NoteName`). Each kind has a semitone
// pattern and, for the diatonic and pentatonic kinds, a letter pattern that
// says which letter name each step gets. The chromatic scale has no letter
// pattern (every step is spelled from a fixed table) and its key is always C.
//
// Key validity follows the circle of fifths: a key is valid when its
// signature needs at most 7 sharps or flats (A# major and Gb minor are not).
//
// Used by note.rs (pitch computation), germ.rs (parsing note names into scale
// positions), and piece.rs/timeline.rs (section scales, key signature changes).

use crate::error::MusicError;
use crate::note::ScalePitch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The seven natural letter names, in scale order starting from C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Letter {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl Letter {
    pub const ALL: [Letter; 7] = [
        Letter::C,
        Letter::D,
        Letter::E,
        Letter::F,
        Letter::G,
        Letter::A,
        Letter::B,
    ];

    /// Position in the letter sequence (C = 0 ... B = 6).
    pub fn index(self) -> i32 {
        self as i32
    }

    /// Letter at `index`, wrapping past B back to C.
    pub fn from_index(index: i32) -> Letter {
        Letter::ALL[index.rem_euclid(7) as usize]
    }

    /// Pitch class of the natural note (C = 0).
    pub fn pitch_class(self) -> i32 {
        match self {
            Letter::C => 0,
            Letter::D => 2,
            Letter::E => 4,
            Letter::F => 5,
            Letter::G => 7,
            Letter::A => 9,
            Letter::B => 11,
        }
    }

    /// Position on the circle of fifths relative to C.
    fn fifths_from_c(self) -> i32 {
        match self {
            Letter::F => -1,
            Letter::C => 0,
            Letter::G => 1,
            Letter::D => 2,
            Letter::A => 3,
            Letter::E => 4,
            Letter::B => 5,
        }
    }

    pub fn from_char(c: char) -> Option<Letter> {
        match c.to_ascii_uppercase() {
            'C' => Some(Letter::C),
            'D' => Some(Letter::D),
            'E' => Some(Letter::E),
            'F' => Some(Letter::F),
            'G' => Some(Letter::G),
            'A' => Some(Letter::A),
            'B' => Some(Letter::B),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            Letter::C => 'C',
            Letter::D => 'D',
            Letter::E => 'E',
            Letter::F => 'F',
            Letter::G => 'G',
            Letter::A => 'A',
            Letter::B => 'B',
        }
    }
}

/// A spelled pitch class: letter plus accidental (+1 per sharp, -1 per flat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NoteName {
    pub letter: Letter,
    pub accidental: i32,
}

impl NoteName {
    pub const C: NoteName = NoteName::natural(Letter::C);

    pub const fn new(letter: Letter, accidental: i32) -> Self {
        NoteName { letter, accidental }
    }

    pub const fn natural(letter: Letter) -> Self {
        NoteName::new(letter, 0)
    }

    /// Pitch class in 0..12.
    pub fn pitch_class(self) -> i32 {
        (self.letter.pitch_class() + self.accidental).rem_euclid(12)
    }

    /// Signed sharps/flats count of the major key on this tonic.
    fn major_key_fifths(self) -> i32 {
        self.letter.fifths_from_c() + 7 * self.accidental
    }

    /// Parse the letter and accidental part of a note token. Accepts `#` or
    /// `s` for sharp and `b` for flat, repeated for doubles.
    pub(crate) fn parse_prefix(text: &str) -> Option<(NoteName, &str)> {
        let mut chars = text.char_indices();
        let (_, first) = chars.next()?;
        let letter = Letter::from_char(first)?;
        let mut accidental = 0;
        let mut rest_start = first.len_utf8();
        for (idx, c) in chars {
            match c {
                '#' | 's' => accidental += 1,
                'b' => accidental -= 1,
                _ => break,
            }
            rest_start = idx + c.len_utf8();
        }
        Some((NoteName::new(letter, accidental), &text[rest_start..]))
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter.as_char())?;
        let symbol = if self.accidental > 0 { "#" } else { "b" };
        for _ in 0..self.accidental.unsigned_abs() {
            f.write_str(symbol)?;
        }
        Ok(())
    }
}

impl FromStr for NoteName {
    type Err = MusicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match NoteName::parse_prefix(trimmed) {
            Some((name, "")) => Ok(name),
            _ => Err(MusicError::InvalidKeySignature(format!(
                "'{trimmed}' is not a note name"
            ))),
        }
    }
}

impl TryFrom<String> for NoteName {
    type Error = MusicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NoteName> for String {
    fn from(value: NoteName) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tonality {
    Major,
    Minor,
}

impl Tonality {
    /// Every tonic with at most one sharp or flat that makes a valid key in
    /// this tonality, ordered from most flats to most sharps.
    pub fn valid_key_names(self) -> Vec<NoteName> {
        let mut names: Vec<NoteName> = Letter::ALL
            .iter()
            .flat_map(|&letter| (-1..=1).map(move |acc| NoteName::new(letter, acc)))
            .filter(|&name| KeySignature::new(name, self).is_ok())
            .collect();
        names.sort_by_key(|&name| KeySignature::fifths(name, self));
        names
    }
}

/// A validated key: tonic plus tonality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct KeySignature {
    pub key: NoteName,
    pub tonality: Tonality,
}

impl KeySignature {
    pub const C_MAJOR: KeySignature = KeySignature {
        key: NoteName::C,
        tonality: Tonality::Major,
    };

    pub fn new(key: NoteName, tonality: Tonality) -> Result<Self, MusicError> {
        let fifths = KeySignature::fifths(key, tonality);
        if fifths.abs() > 7 {
            return Err(MusicError::InvalidKeySignature(format!(
                "{key} {tonality:?} would need {} {}",
                fifths.abs(),
                if fifths > 0 { "sharps" } else { "flats" }
            )));
        }
        Ok(KeySignature { key, tonality })
    }

    /// Number of sharps (positive) or flats (negative).
    pub fn sharps_or_flats(&self) -> i32 {
        KeySignature::fifths(self.key, self.tonality)
    }

    fn fifths(key: NoteName, tonality: Tonality) -> i32 {
        match tonality {
            Tonality::Major => key.major_key_fifths(),
            Tonality::Minor => key.major_key_fifths() - 3,
        }
    }
}

/// The available scale types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScaleKind {
    Major,
    NaturalMinor,
    HarmonicMinor,
    MajorPentatonic,
    MinorPentatonic,
    Chromatic,
}

impl ScaleKind {
    pub const ALL: [ScaleKind; 6] = [
        ScaleKind::Major,
        ScaleKind::NaturalMinor,
        ScaleKind::HarmonicMinor,
        ScaleKind::MajorPentatonic,
        ScaleKind::MinorPentatonic,
        ScaleKind::Chromatic,
    ];

    /// Semitones above the tonic for each step.
    pub fn semitone_pattern(self) -> &'static [i32] {
        match self {
            ScaleKind::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleKind::NaturalMinor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleKind::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            ScaleKind::MajorPentatonic => &[0, 2, 4, 7, 9],
            ScaleKind::MinorPentatonic => &[0, 3, 5, 7, 10],
            ScaleKind::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }

    /// Letters above the tonic's letter for each step. `None` for the
    /// chromatic scale, which spells its steps from a fixed table.
    pub fn letter_pattern(self) -> Option<&'static [i32]> {
        match self {
            ScaleKind::Major | ScaleKind::NaturalMinor | ScaleKind::HarmonicMinor => {
                Some(&[0, 1, 2, 3, 4, 5, 6])
            }
            ScaleKind::MajorPentatonic => Some(&[0, 1, 2, 4, 5]),
            ScaleKind::MinorPentatonic => Some(&[0, 2, 3, 4, 6]),
            ScaleKind::Chromatic => None,
        }
    }

    pub fn tonality(self) -> Tonality {
        match self {
            ScaleKind::Major | ScaleKind::MajorPentatonic | ScaleKind::Chromatic => {
                Tonality::Major
            }
            ScaleKind::NaturalMinor | ScaleKind::HarmonicMinor | ScaleKind::MinorPentatonic => {
                Tonality::Minor
            }
        }
    }
}

const CHROMATIC_SPELLING: [NoteName; 12] = [
    NoteName::natural(Letter::C),
    NoteName::new(Letter::C, 1),
    NoteName::natural(Letter::D),
    NoteName::new(Letter::E, -1),
    NoteName::natural(Letter::E),
    NoteName::natural(Letter::F),
    NoteName::new(Letter::F, 1),
    NoteName::natural(Letter::G),
    NoteName::new(Letter::G, 1),
    NoteName::natural(Letter::A),
    NoteName::new(Letter::B, -1),
    NoteName::natural(Letter::B),
];

/// A scale kind in a validated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scale {
    kind: ScaleKind,
    key: NoteName,
}

impl Scale {
    /// Build a scale, rejecting keys whose signature would need more than
    /// seven sharps or flats. The chromatic scale ignores `key` and uses C.
    pub fn new(kind: ScaleKind, key: NoteName) -> Result<Self, MusicError> {
        let key = if kind == ScaleKind::Chromatic {
            NoteName::C
        } else {
            key
        };
        KeySignature::new(key, kind.tonality())?;
        Ok(Scale { kind, key })
    }

    pub fn c_major() -> Self {
        Scale {
            kind: ScaleKind::Major,
            key: NoteName::C,
        }
    }

    pub fn kind(&self) -> ScaleKind {
        self.kind
    }

    pub fn key(&self) -> NoteName {
        self.key
    }

    pub fn key_signature(&self) -> KeySignature {
        KeySignature {
            key: self.key,
            tonality: self.kind.tonality(),
        }
    }

    /// Number of steps per octave.
    pub fn steps_per_octave(&self) -> i32 {
        self.kind.semitone_pattern().len() as i32
    }

    pub fn tonic_pitch_class(&self) -> i32 {
        self.key.pitch_class()
    }

    /// MIDI pitch of a scale position. Steps outside `0..len` carry into the
    /// octave, so `(step 7, octave 4)` in a heptatonic scale is the tonic of
    /// octave 5.
    pub fn midi_pitch(&self, pitch: ScalePitch) -> i32 {
        let len = self.steps_per_octave();
        let absolute = pitch.octave * len + pitch.step;
        let step = absolute.rem_euclid(len);
        let octave = absolute.div_euclid(len);
        (octave + 1) * 12
            + self.tonic_pitch_class()
            + self.kind.semitone_pattern()[step as usize]
            + pitch.total_chromatic()
    }

    /// The same sounding pitch written on the neighbouring step in the
    /// direction of its own correction: in C major F# becomes G flat and Eb
    /// becomes D sharp. Unaltered pitches and the segment correction are
    /// left alone.
    pub fn respell_toward_accidental(&self, pitch: ScalePitch) -> ScalePitch {
        let direction = pitch.chromatic.signum();
        if direction == 0 {
            return pitch;
        }
        let len = self.steps_per_octave();
        let absolute = pitch.absolute_step(len);
        let natural = |abs: i32| self.midi_pitch(ScalePitch::from_absolute_step(abs, len, 0));
        let neighbour = absolute + direction;
        let gap = natural(neighbour) - natural(absolute);
        ScalePitch::from_absolute_step(neighbour, len, pitch.chromatic - gap)
            .with_segment_chromatic(pitch.segment_chromatic)
    }

    /// Spelling of a step, ignoring any chromatic correction.
    pub fn note_name(&self, step: i32) -> NoteName {
        let step = step.rem_euclid(self.steps_per_octave()) as usize;
        match self.kind.letter_pattern() {
            Some(letters) => {
                let letter = Letter::from_index(self.key.letter.index() + letters[step]);
                let target = self.tonic_pitch_class() + self.kind.semitone_pattern()[step];
                let accidental = (target - letter.pitch_class() + 6).rem_euclid(12) - 6;
                NoteName::new(letter, accidental)
            }
            None => CHROMATIC_SPELLING[step],
        }
    }

    /// Find the scale position of a spelled note in scientific octave
    /// numbering (C4 = 60). Notes outside the scale get the nearest step at
    /// or below their letter plus a chromatic correction.
    pub fn locate(&self, name: NoteName, scientific_octave: i32) -> ScalePitch {
        let midi = (scientific_octave + 1) * 12 + name.letter.pitch_class() + name.accidental;
        let tonic = self.tonic_pitch_class();
        match self.kind.letter_pattern() {
            Some(letters) => {
                let letter_offset = (name.letter.index() - self.key.letter.index()).rem_euclid(7);
                let step = letters
                    .iter()
                    .rposition(|&l| l <= letter_offset)
                    .unwrap_or(0);
                let base = tonic + self.kind.semitone_pattern()[step];
                let octave = (midi - base + 6).div_euclid(12) - 1;
                ScalePitch::new(step as i32, octave, midi - ((octave + 1) * 12 + base))
            }
            None => ScalePitch::new(
                (midi - tonic).rem_euclid(12),
                (midi - tonic).div_euclid(12) - 1,
                0,
            ),
        }
    }
}

impl Default for Scale {
    fn default() -> Self {
        Scale::c_major()
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.key, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> NoteName {
        s.parse().unwrap()
    }

    fn key(s: &str, tonality: Tonality) -> KeySignature {
        KeySignature::new(name(s), tonality).unwrap()
    }

    #[test]
    fn test_sharps_or_flats() {
        assert_eq!(key("C", Tonality::Major).sharps_or_flats(), 0);
        assert_eq!(key("E", Tonality::Major).sharps_or_flats(), 4);
        assert_eq!(key("Bb", Tonality::Major).sharps_or_flats(), -2);
        assert_eq!(key("Bb", Tonality::Minor).sharps_or_flats(), -5);
        assert_eq!(key("D", Tonality::Minor).sharps_or_flats(), -1);
        assert_eq!(key("G#", Tonality::Minor).sharps_or_flats(), 5);
        assert_eq!(key("Ab", Tonality::Major).sharps_or_flats(), -4);
        assert_eq!(key("C#", Tonality::Major).sharps_or_flats(), 7);
        assert_eq!(key("Cb", Tonality::Major).sharps_or_flats(), -7);
    }

    #[test]
    fn test_invalid_keys_rejected() {
        for (tonic, tonality) in [
            ("A#", Tonality::Major),
            ("Gb", Tonality::Minor),
            ("Fb", Tonality::Major),
            ("E#", Tonality::Minor),
        ] {
            let err = KeySignature::new(name(tonic), tonality).unwrap_err();
            assert!(matches!(err, MusicError::InvalidKeySignature(_)), "{tonic}");
        }
        assert!(Scale::new(ScaleKind::Major, name("A#")).is_err());
        assert!(Scale::new(ScaleKind::NaturalMinor, name("Gb")).is_err());
    }

    #[test]
    fn test_valid_key_names() {
        let major = Tonality::Major.valid_key_names();
        assert_eq!(major.len(), 15);
        assert_eq!(major.first(), Some(&name("Cb")));
        assert_eq!(major.last(), Some(&name("C#")));
        assert!(!major.contains(&name("A#")));

        let minor = Tonality::Minor.valid_key_names();
        assert_eq!(minor.len(), 15);
        assert_eq!(minor.first(), Some(&name("Ab")));
        assert_eq!(minor.last(), Some(&name("A#")));
    }

    #[test]
    fn test_note_name_parse_and_display() {
        assert_eq!(name("F#"), NoteName::new(Letter::F, 1));
        assert_eq!(name("Fs"), NoteName::new(Letter::F, 1));
        assert_eq!(name("Bbb"), NoteName::new(Letter::B, -2));
        assert_eq!(name("bb"), NoteName::new(Letter::B, -1));
        assert_eq!(NoteName::new(Letter::C, 2).to_string(), "C##");
        assert_eq!(NoteName::new(Letter::E, -1).to_string(), "Eb");
        assert!("H".parse::<NoteName>().is_err());
        assert!("C4".parse::<NoteName>().is_err());
    }

    #[test]
    fn test_midi_pitch_of_c4_is_60() {
        let scale = Scale::c_major();
        let c4 = ScalePitch::new(0, 4, 0);
        assert_eq!(scale.midi_pitch(c4), 60);
        assert_eq!(scale.midi_pitch(ScalePitch::new(7, 4, 0)), 72);
        assert_eq!(scale.midi_pitch(ScalePitch::new(-1, 4, 0)), 59);
        assert_eq!(scale.midi_pitch(ScalePitch::new(2, 4, -1)), 63);
    }

    #[test]
    fn test_locate_in_g_major() {
        let g_major = Scale::new(ScaleKind::Major, name("G")).unwrap();
        for (note, octave, midi) in [
            ("G", 4, 67),
            ("A", 4, 69),
            ("B", 4, 71),
            ("C", 5, 72),
            ("F#", 4, 66),
            ("F", 4, 65),
            ("G", 3, 55),
        ] {
            let pitch = g_major.locate(name(note), octave);
            assert_eq!(g_major.midi_pitch(pitch), midi, "{note}{octave}");
        }
        assert_eq!(g_major.locate(name("G"), 4), ScalePitch::new(0, 4, 0));
        assert_eq!(g_major.locate(name("B"), 4), ScalePitch::new(2, 4, 0));
        // F natural is the lowered leading tone, which belongs to octave 3.
        assert_eq!(g_major.locate(name("F"), 4), ScalePitch::new(6, 3, -1));
    }

    #[test]
    fn test_locate_in_pentatonic_and_chromatic() {
        let pentatonic = Scale::new(ScaleKind::MajorPentatonic, name("C")).unwrap();
        // F is not in C major pentatonic: it is E raised a semitone.
        assert_eq!(pentatonic.locate(name("F"), 4), ScalePitch::new(2, 4, 1));
        assert_eq!(pentatonic.midi_pitch(ScalePitch::new(2, 4, 1)), 65);

        let chromatic = Scale::new(ScaleKind::Chromatic, name("D")).unwrap();
        assert_eq!(chromatic.key(), NoteName::C);
        assert_eq!(chromatic.locate(name("Eb"), 4), ScalePitch::new(3, 4, 0));
        assert_eq!(chromatic.midi_pitch(ScalePitch::new(3, 4, 0)), 63);
    }

    #[test]
    fn test_respell_toward_accidental() {
        let scale = Scale::c_major();
        let f_sharp = scale.locate(name("F#"), 4);
        assert_eq!(scale.respell_toward_accidental(f_sharp), ScalePitch::new(4, 4, -1));
        let e_flat = scale.locate(name("Eb"), 4);
        assert_eq!(scale.respell_toward_accidental(e_flat), ScalePitch::new(1, 4, 1));
        // B# sits on the half step: C natural on the next octave.
        let b_sharp = ScalePitch::new(6, 4, 1).with_segment_chromatic(-1);
        let respelled = scale.respell_toward_accidental(b_sharp);
        assert_eq!(respelled, ScalePitch::new(0, 5, 0).with_segment_chromatic(-1));
        assert_eq!(scale.midi_pitch(respelled), scale.midi_pitch(b_sharp));

        let g = ScalePitch::new(4, 4, 0);
        assert_eq!(scale.respell_toward_accidental(g), g);
    }

    #[test]
    fn test_note_names_follow_letter_pattern() {
        let e_major = Scale::new(ScaleKind::Major, name("E")).unwrap();
        let spelled: Vec<String> = (0..7).map(|s| e_major.note_name(s).to_string()).collect();
        assert_eq!(spelled, ["E", "F#", "G#", "A", "B", "C#", "D#"]);

        let a_minor_pent = Scale::new(ScaleKind::MinorPentatonic, name("A")).unwrap();
        let spelled: Vec<String> = (0..5).map(|s| a_minor_pent.note_name(s).to_string()).collect();
        assert_eq!(spelled, ["A", "C", "D", "E", "G"]);

        let chromatic = Scale::new(ScaleKind::Chromatic, NoteName::C).unwrap();
        assert_eq!(chromatic.note_name(10).to_string(), "Bb");
        assert!(chromatic.kind().letter_pattern().is_none());
    }

    #[test]
    fn test_patterns_agree_in_length() {
        for kind in ScaleKind::ALL {
            if let Some(letters) = kind.letter_pattern() {
                assert_eq!(letters.len(), kind.semitone_pattern().len(), "{kind:?}");
            }
        }
    }
}
