// Germ string parser.
//
// A germ is written as whitespace-separated tokens of the form
// `PITCH[,DURATION[,VOLUME]]`, for example `"G4,1/4,MF A4,1/8 R,1/8 B4"`.
//
// - PITCH is `R` for a rest, or a letter A-G, optional accidentals (`#` or `s`
//   for sharp, `b` for flat, doubled for double sharps/flats), and an integer
//   octave in scientific numbering (C4 is middle C; `C-1` is allowed).
// - DURATION is a positive fraction of a whole note (`1/4`, `3/8`, `1`).
// - VOLUME is a dynamic marking (`PPP` .. `FFF`) or a MIDI volume 0..=127.
//
// Omitted durations repeat the previous note's (1/4 for the first note);
// omitted volumes repeat the previous pitched note's (MF at the start).
// Pitches are located in the given scale, so notes outside the scale get a
// chromatic correction. The first note is flagged as the start of a germ copy.

use crate::error::MusicError;
use crate::note::{Dynamic, Note, NoteList};
use crate::scale::{NoteName, Scale};
use fractal_composer_fraction::Fraction;

/// Values carried from one token to the next when a field is omitted.
struct Carry {
    duration: Fraction,
    volume: u8,
}

impl Default for Carry {
    fn default() -> Self {
        Carry {
            duration: Fraction::QUARTER,
            volume: Dynamic::MF.volume(),
        }
    }
}

/// Parse a whitespace-separated germ string. An empty string yields an
/// empty list.
pub fn parse_note_list(text: &str, scale: Scale) -> Result<NoteList, MusicError> {
    let mut carry = Carry::default();
    let mut notes = Vec::new();
    for token in text.split_whitespace() {
        notes.push(parse_token(token, scale, &mut carry)?);
    }
    if let Some(first) = notes.first_mut() {
        first.first_of_germ_copy = true;
    }
    Ok(NoteList::new(notes))
}

/// Parse a single token with default duration 1/4 and volume MF.
pub fn parse_note(token: &str, scale: Scale) -> Result<Note, MusicError> {
    parse_token(token, scale, &mut Carry::default())
}

fn parse_token(token: &str, scale: Scale, carry: &mut Carry) -> Result<Note, MusicError> {
    let mut fields = token.split(',');
    let pitch_text = fields.next().unwrap_or_default();
    let duration_text = fields.next();
    let volume_text = fields.next();
    if fields.next().is_some() {
        return Err(MusicError::note_parse(token, "too many fields"));
    }

    if let Some(text) = duration_text {
        let duration: Fraction = text
            .parse()
            .map_err(|_| MusicError::note_parse(token, format!("bad duration '{text}'")))?;
        if !duration.is_positive() {
            return Err(MusicError::note_parse(token, "duration must be positive"));
        }
        carry.duration = duration;
    }

    if pitch_text.eq_ignore_ascii_case("r") {
        if volume_text.is_some() {
            return Err(MusicError::note_parse(token, "a rest has no volume"));
        }
        return Ok(Note::rest(carry.duration));
    }

    let (name, octave) = parse_pitch(pitch_text)
        .ok_or_else(|| MusicError::note_parse(token, format!("bad pitch '{pitch_text}'")))?;
    if let Some(text) = volume_text {
        carry.volume = parse_volume(text)
            .ok_or_else(|| MusicError::note_parse(token, format!("bad volume '{text}'")))?;
    }
    Ok(Note::pitched(
        scale.locate(name, octave),
        scale,
        carry.duration,
        carry.volume,
    ))
}

fn parse_pitch(text: &str) -> Option<(NoteName, i32)> {
    let (name, octave_text) = NoteName::parse_prefix(text)?;
    // `i32::from_str` accepts a leading '+', which is not part of the grammar.
    if octave_text.starts_with('+') {
        return None;
    }
    Some((name, octave_text.parse().ok()?))
}

fn parse_volume(text: &str) -> Option<u8> {
    match Dynamic::from_name(text) {
        Some(dynamic) => Some(dynamic.volume()),
        None => text.parse::<u8>().ok().filter(|&v| v <= 127),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scale::ScaleKind;

    fn frac(n: i64, d: i64) -> Fraction {
        Fraction::new(n, d).unwrap()
    }

    fn g_major() -> Scale {
        Scale::new(ScaleKind::Major, "G".parse().unwrap()).unwrap()
    }

    #[test]
    fn test_parse_germ_with_defaults() {
        let list = parse_note_list("G4,1/4 A4,1/8 B4 G4,1/4,F R", g_major()).unwrap();
        assert_eq!(
            list.midi_pitches(),
            vec![Some(67), Some(69), Some(71), Some(67), None]
        );
        assert_eq!(
            list.durations(),
            vec![frac(1, 4), frac(1, 8), frac(1, 8), frac(1, 4), frac(1, 4)]
        );
        let volumes: Vec<u8> = list.iter().map(|n| n.volume).collect();
        assert_eq!(volumes, vec![80, 80, 80, 96, 0]);
        let flags: Vec<bool> = list.iter().map(|n| n.first_of_germ_copy).collect();
        assert_eq!(flags, vec![true, false, false, false, false]);
    }

    #[test]
    fn test_volume_carries_across_rests() {
        let list = parse_note_list("C4,1/4,P R,1/8 D4,1/8,100 E4", Scale::c_major()).unwrap();
        let volumes: Vec<u8> = list.iter().map(|n| n.volume).collect();
        assert_eq!(volumes, vec![49, 0, 100, 100]);
        assert_eq!(list.notes[3].duration, frac(1, 8));
    }

    #[test]
    fn test_accidentals_and_octaves() {
        let c_major = Scale::c_major();
        let list = parse_note_list("F#4 Bb3 Css4 Dbb4 C-1 c5", c_major).unwrap();
        assert_eq!(
            list.midi_pitches(),
            vec![Some(66), Some(58), Some(62), Some(60), Some(0), Some(72)]
        );
        assert_eq!(list.number_of_accidentals(), 4);
        assert!(list.iter().all(|n| n.duration == Fraction::QUARTER));
    }

    #[test]
    fn test_empty_string_gives_empty_list() {
        assert!(parse_note_list("   ", Scale::c_major()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "H4", "C", "C4,0", "C4,-1/4", "C4,1/0", "C4,x", "C4,1/4,loud", "C4,1/4,128",
            "C4,1/4,MF,1", "R,1/4,MF", "C+4", "C4.5",
        ] {
            let err = parse_note(bad, Scale::c_major()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parse, "{bad}");
        }
    }

    #[test]
    fn test_error_names_token() {
        let err = parse_note_list("C4 D4,1/4 Q4", Scale::c_major()).unwrap_err();
        match err {
            MusicError::NoteParse { token, .. } => assert_eq!(token, "Q4"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
