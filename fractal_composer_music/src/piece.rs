// Piece assembly: voices, sections, and the voice-section grid.
//
// A piece has one germ, a set of voices, and a sequence of sections. Every
// (voice, section) pair is a *voice-section*, and its result is computed by
// a fixed pipeline:
//
//   germ -> voice's modified germ (octave shift, duration factor)
//        -> section scale override, if any
//        -> section transform (inversion / retrograde / both)
//        -> self-similarity with the voice-section's settings
//        -> tag every note with its source
//
// Results are cached in a `BTreeMap` keyed by voice-section. Every setter that
// feeds a result clears exactly the affected entries before returning, so a
// stale result is never observable. Missing results are computed together in
// parallel with rayon; each computation only reads the piece.
//
// Assembling a voice stretches each voice-section result to its section's
// duration by repetition or truncation (individual durations are never
// changed), optionally framed by a layered intro and outro in which voices
// enter one by one and drop out in reverse.
//
// See also: self_similarity.rs for the expansion, timeline.rs for tick
// layout, config.rs for building a piece from JSON.

use crate::error::MusicError;
use crate::germ::parse_note_list;
use crate::note::{Note, NoteList, NoteSource, SectionId, VoiceId};
use crate::scale::{KeySignature, Scale};
use crate::self_similarity::{SelfSimilaritySettings, SelfSimilarityTransformer};
use crate::time_signature::TimeSignature;
use crate::timeline::{
    DEFAULT_MAX_TICK_RESOLUTION, MAX_CHANNELS, Timeline, TimelineSettings, build_timeline,
};
use crate::transform::{
    OctaveTransformer, RhythmicDurationTransformer, SectionTransform, Transformer,
};
use fractal_composer_fraction::Fraction;
use log::trace;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_TEMPO_BPM: u32 = 90;
pub const DEFAULT_INSTRUMENT: &str = "Piano";

/// An independent melodic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub id: VoiceId,
    pub octave_adjustment: i32,
    /// Multiplies every germ duration; below 1 the voice moves faster.
    pub speed_scale_factor: Fraction,
    pub instrument: Option<String>,
}

impl Voice {
    /// The germ shifted to this voice's octave and tempo.
    pub fn modified_germ(&self, germ: &NoteList) -> Result<NoteList, MusicError> {
        let shifted = OctaveTransformer::new(self.octave_adjustment).transform(germ)?;
        RhythmicDurationTransformer::new(self.speed_scale_factor)?.transform(&shifted)
    }
}

/// Settings shared by a section's voice-sections (and overridable per
/// voice-section).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSectionSettings {
    pub self_similarity: SelfSimilaritySettings,
    pub transform: SectionTransform,
}

impl VoiceSectionSettings {
    pub fn new(self_similarity: SelfSimilaritySettings, transform: SectionTransform) -> Self {
        VoiceSectionSettings {
            self_similarity,
            transform,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub id: SectionId,
    pub settings: VoiceSectionSettings,
    /// Overrides the piece scale for this section.
    pub scale: Option<Scale>,
    /// Fixed length in whole notes; the longest voice result when unset.
    pub duration: Option<Fraction>,
}

/// Key of one cell in the voice x section grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceSection {
    pub voice: VoiceId,
    pub section: SectionId,
}

impl VoiceSection {
    pub fn new(voice: VoiceId, section: SectionId) -> Self {
        VoiceSection { voice, section }
    }
}

#[derive(Debug, Clone)]
pub struct Piece {
    germ_text: String,
    germ: NoteList,
    scale: Scale,
    time_signature: TimeSignature,
    tempo_bpm: u32,
    max_tick_resolution: i64,
    layered_intro: bool,
    layered_outro: bool,
    voices: Vec<Voice>,
    sections: Vec<Section>,
    overrides: BTreeMap<VoiceSection, VoiceSectionSettings>,
    results: BTreeMap<VoiceSection, NoteList>,
    next_voice_id: u32,
    next_section_id: u32,
}

impl Default for Piece {
    fn default() -> Self {
        Piece::new(Scale::default())
    }
}

impl Piece {
    /// An empty piece (no germ, voices or sections) in `scale`.
    pub fn new(scale: Scale) -> Self {
        Piece {
            germ_text: String::new(),
            germ: NoteList::default(),
            scale,
            time_signature: TimeSignature::default(),
            tempo_bpm: DEFAULT_TEMPO_BPM,
            max_tick_resolution: DEFAULT_MAX_TICK_RESOLUTION,
            layered_intro: false,
            layered_outro: false,
            voices: Vec::new(),
            sections: Vec::new(),
            overrides: BTreeMap::new(),
            results: BTreeMap::new(),
            next_voice_id: 0,
            next_section_id: 0,
        }
    }

    // -- Accessors --

    pub fn germ(&self) -> &NoteList {
        &self.germ
    }

    pub fn germ_text(&self) -> &str {
        &self.germ_text
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn tempo_bpm(&self) -> u32 {
        self.tempo_bpm
    }

    pub fn max_tick_resolution(&self) -> i64 {
        self.max_tick_resolution
    }

    pub fn layered_intro(&self) -> bool {
        self.layered_intro
    }

    pub fn layered_outro(&self) -> bool {
        self.layered_outro
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn voice(&self, id: VoiceId) -> Result<&Voice, MusicError> {
        self.voices
            .iter()
            .find(|v| v.id == id)
            .ok_or(MusicError::UnknownVoice(id))
    }

    pub fn section(&self, id: SectionId) -> Result<&Section, MusicError> {
        self.sections
            .iter()
            .find(|s| s.id == id)
            .ok_or(MusicError::UnknownSection(id))
    }

    fn voice_mut(&mut self, id: VoiceId) -> Result<&mut Voice, MusicError> {
        self.voices
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or(MusicError::UnknownVoice(id))
    }

    fn section_mut(&mut self, id: SectionId) -> Result<&mut Section, MusicError> {
        self.sections
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(MusicError::UnknownSection(id))
    }

    /// The settings a voice-section runs with: its override if one is set,
    /// otherwise the section's.
    pub fn voice_section_settings(
        &self,
        voice: VoiceId,
        section: SectionId,
    ) -> Result<VoiceSectionSettings, MusicError> {
        self.voice(voice)?;
        let section_settings = self.section(section)?.settings;
        Ok(self
            .overrides
            .get(&VoiceSection::new(voice, section))
            .copied()
            .unwrap_or(section_settings))
    }

    /// Whether a voice-section's result is currently cached.
    pub fn is_cached(&self, voice: VoiceId, section: SectionId) -> bool {
        self.results
            .contains_key(&VoiceSection::new(voice, section))
    }

    // -- Cache invalidation --

    fn clear_all_results(&mut self) {
        trace!("invalidating all {} voice-section results", self.results.len());
        self.results.clear();
    }

    fn clear_voice_results(&mut self, voice: VoiceId) {
        trace!("invalidating results of voice {voice}");
        self.results.retain(|key, _| key.voice != voice);
    }

    fn clear_section_results(&mut self, section: SectionId) {
        trace!("invalidating results of section {section}");
        self.results.retain(|key, _| key.section != section);
    }

    // -- Piece-level settings --

    /// Parse and install a new germ. On a parse error the old germ stays.
    pub fn set_germ(&mut self, text: &str) -> Result<(), MusicError> {
        self.germ = parse_note_list(text, self.scale)?;
        self.germ_text = text.to_string();
        self.clear_all_results();
        Ok(())
    }

    /// Change the piece scale. The germ text is re-read in the new scale, so
    /// its written pitches are kept.
    pub fn set_scale(&mut self, scale: Scale) -> Result<(), MusicError> {
        self.germ = parse_note_list(&self.germ_text, scale)?;
        self.scale = scale;
        self.clear_all_results();
        Ok(())
    }

    pub fn set_time_signature(&mut self, time_signature: TimeSignature) {
        self.time_signature = time_signature;
    }

    pub fn set_tempo_bpm(&mut self, tempo_bpm: u32) {
        self.tempo_bpm = tempo_bpm;
    }

    pub fn set_max_tick_resolution(&mut self, max: i64) {
        self.max_tick_resolution = max;
    }

    pub fn set_layered_intro(&mut self, enabled: bool) {
        self.layered_intro = enabled;
    }

    pub fn set_layered_outro(&mut self, enabled: bool) {
        self.layered_outro = enabled;
    }

    // -- Voices --

    pub fn add_voice(
        &mut self,
        octave_adjustment: i32,
        speed_scale_factor: Fraction,
        instrument: Option<String>,
    ) -> Result<VoiceId, MusicError> {
        if self.voices.len() >= MAX_CHANNELS {
            return Err(MusicError::TooManyVoices {
                count: self.voices.len() + 1,
                max: MAX_CHANNELS,
            });
        }
        RhythmicDurationTransformer::new(speed_scale_factor)?;
        let id = VoiceId(self.next_voice_id);
        self.next_voice_id += 1;
        self.voices.push(Voice {
            id,
            octave_adjustment,
            speed_scale_factor,
            instrument,
        });
        Ok(id)
    }

    pub fn remove_voice(&mut self, id: VoiceId) -> Result<(), MusicError> {
        self.voice(id)?;
        self.voices.retain(|v| v.id != id);
        self.overrides.retain(|key, _| key.voice != id);
        self.clear_voice_results(id);
        Ok(())
    }

    pub fn set_voice_octave_adjustment(
        &mut self,
        id: VoiceId,
        octave_adjustment: i32,
    ) -> Result<(), MusicError> {
        self.voice_mut(id)?.octave_adjustment = octave_adjustment;
        self.clear_voice_results(id);
        Ok(())
    }

    pub fn set_voice_speed_scale_factor(
        &mut self,
        id: VoiceId,
        factor: Fraction,
    ) -> Result<(), MusicError> {
        RhythmicDurationTransformer::new(factor)?;
        self.voice_mut(id)?.speed_scale_factor = factor;
        self.clear_voice_results(id);
        Ok(())
    }

    /// Instruments are attached when a voice is assembled, so cached results
    /// stay valid.
    pub fn set_voice_instrument(
        &mut self,
        id: VoiceId,
        instrument: Option<String>,
    ) -> Result<(), MusicError> {
        self.voice_mut(id)?.instrument = instrument;
        Ok(())
    }

    /// Three voices an octave apart; the highest moves twice as fast and the
    /// lowest half as fast.
    pub fn create_default_voices(&mut self) -> Result<(), MusicError> {
        let instrument = || Some(DEFAULT_INSTRUMENT.to_string());
        self.add_voice(1, Fraction::new(1, 2)?, instrument())?;
        self.add_voice(0, Fraction::ONE, instrument())?;
        self.add_voice(-1, Fraction::from_integer(2), instrument())?;
        Ok(())
    }

    // -- Sections --

    pub fn add_section(&mut self, settings: VoiceSectionSettings) -> SectionId {
        let id = SectionId(self.next_section_id);
        self.next_section_id += 1;
        self.sections.push(Section {
            id,
            settings,
            scale: None,
            duration: None,
        });
        id
    }

    pub fn remove_section(&mut self, id: SectionId) -> Result<(), MusicError> {
        self.section(id)?;
        self.sections.retain(|s| s.id != id);
        self.overrides.retain(|key, _| key.section != id);
        self.clear_section_results(id);
        Ok(())
    }

    pub fn set_section_settings(
        &mut self,
        id: SectionId,
        settings: VoiceSectionSettings,
    ) -> Result<(), MusicError> {
        self.section_mut(id)?.settings = settings;
        self.clear_section_results(id);
        Ok(())
    }

    pub fn set_section_scale(&mut self, id: SectionId, scale: Option<Scale>) -> Result<(), MusicError> {
        self.section_mut(id)?.scale = scale;
        self.clear_section_results(id);
        Ok(())
    }

    /// Fix the section's length, or let it follow the longest voice result
    /// with `None`. Results are stretched at assembly time, so the cache is
    /// unaffected.
    pub fn set_section_duration(
        &mut self,
        id: SectionId,
        duration: Option<Fraction>,
    ) -> Result<(), MusicError> {
        if let Some(d) = duration.filter(|d| !d.is_positive()) {
            return Err(MusicError::NonPositiveFactor(d.to_string()));
        }
        self.section_mut(id)?.duration = duration;
        Ok(())
    }

    /// Override the settings of one voice-section, or remove the override
    /// with `None`.
    pub fn set_voice_section_settings(
        &mut self,
        voice: VoiceId,
        section: SectionId,
        settings: Option<VoiceSectionSettings>,
    ) -> Result<(), MusicError> {
        self.voice(voice)?;
        self.section(section)?;
        let key = VoiceSection::new(voice, section);
        match settings {
            Some(settings) => {
                self.overrides.insert(key, settings);
            }
            None => {
                self.overrides.remove(&key);
            }
        }
        trace!("invalidating result of voice {voice}, section {section}");
        self.results.remove(&key);
        Ok(())
    }

    /// Four sections: the germ expanded as is, then expansions of its
    /// inversion, retrograde-inversion and retrograde.
    pub fn create_default_sections(&mut self) {
        let self_similarity = SelfSimilaritySettings::new(true, true, false, 1);
        for transform in [
            SectionTransform::None,
            SectionTransform::Inversion,
            SectionTransform::RetrogradeInversion,
            SectionTransform::Retrograde,
        ] {
            self.add_section(VoiceSectionSettings::new(self_similarity, transform));
        }
    }

    pub fn create_default_settings(&mut self) -> Result<(), MusicError> {
        self.create_default_voices()?;
        self.create_default_sections();
        Ok(())
    }

    // -- Generation --

    fn compute_voice_section(&self, key: VoiceSection) -> Result<NoteList, MusicError> {
        let voice = self.voice(key.voice)?;
        let section = self.section(key.section)?;
        let settings = self.voice_section_settings(key.voice, key.section)?;

        let mut list = voice.modified_germ(&self.germ)?;
        if let Some(scale) = section.scale {
            list = list.with_scale(scale);
        }
        let transformed = settings.transform.apply(&list)?;
        let mut result =
            SelfSimilarityTransformer::new(settings.self_similarity).transform(&transformed)?;
        result.set_source_on_all(NoteSource::section(key.voice, key.section));
        Ok(result)
    }

    /// Compute every voice-section result that is not cached.
    pub fn generate_voice_sections(&mut self) -> Result<(), MusicError> {
        let missing: Vec<VoiceSection> = self
            .voices
            .iter()
            .flat_map(|v| {
                self.sections
                    .iter()
                    .map(move |s| VoiceSection::new(v.id, s.id))
            })
            .filter(|key| !self.results.contains_key(key))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let this = &*self;
        let computed: Vec<(VoiceSection, NoteList)> = missing
            .par_iter()
            .map(|&key| {
                this.compute_voice_section(key)
                    .map(|list| (key, list))
                    .map_err(|source| MusicError::VoiceSection {
                        voice: key.voice,
                        section: key.section,
                        source: Box::new(source),
                    })
            })
            .collect::<Result<_, _>>()?;
        self.results.extend(computed);
        Ok(())
    }

    /// The (unstretched) result of one voice-section.
    pub fn voice_section_result(
        &mut self,
        voice: VoiceId,
        section: SectionId,
    ) -> Result<&NoteList, MusicError> {
        self.voice(voice)?;
        self.section(section)?;
        self.generate_voice_sections()?;
        self.results
            .get(&VoiceSection::new(voice, section))
            .ok_or(MusicError::UnknownSection(section))
    }

    /// Declared length of a section: its fixed duration, or the longest
    /// voice result in it. Requires generated results.
    fn declared_section_duration(&self, section: &Section) -> Result<Fraction, MusicError> {
        if let Some(duration) = section.duration {
            return Ok(duration);
        }
        let mut longest = Fraction::ZERO;
        for voice in &self.voices {
            if let Some(result) = self.results.get(&VoiceSection::new(voice.id, section.id)) {
                longest = longest.max(result.duration()?);
            }
        }
        Ok(longest)
    }

    pub fn section_duration(&mut self, id: SectionId) -> Result<Fraction, MusicError> {
        self.generate_voice_sections()?;
        let section = self.section(id)?;
        self.declared_section_duration(section)
    }

    /// Longest modified germ among the voices: the length of one intro or
    /// outro layer.
    fn layer_duration(&self) -> Result<Fraction, MusicError> {
        let mut longest = Fraction::ZERO;
        for voice in &self.voices {
            longest = longest.max(voice.modified_germ(&self.germ)?.duration()?);
        }
        Ok(longest)
    }

    /// One layer per voice. `plays(layer)` decides whether the voice plays
    /// its modified germ or rests in that layer.
    fn layers(
        &self,
        voice: &Voice,
        layer_duration: Fraction,
        source: impl Fn(u32) -> NoteSource,
        plays: impl Fn(usize) -> bool,
    ) -> Result<Vec<Note>, MusicError> {
        let mut notes = Vec::new();
        if !layer_duration.is_positive() {
            return Ok(notes);
        }
        let modified = voice.modified_germ(&self.germ)?;
        for layer in 0..self.voices.len() {
            let mut part = if plays(layer) {
                fill_to_duration(&modified, layer_duration)?
            } else {
                NoteList::new(vec![Note::rest(layer_duration)])
            };
            part.set_source_on_all(source(layer as u32));
            notes.extend(part.notes);
        }
        Ok(notes)
    }

    /// The full sequence of one voice: intro, every section stretched to its
    /// declared duration, outro, with adjacent same-source rests merged.
    pub fn entire_voice(&mut self, id: VoiceId) -> Result<NoteList, MusicError> {
        self.generate_voice_sections()?;
        self.assemble_voice(id)
    }

    fn assemble_voice(&self, id: VoiceId) -> Result<NoteList, MusicError> {
        let voice = self.voice(id)?;
        let index = self
            .voices
            .iter()
            .position(|v| v.id == id)
            .ok_or(MusicError::UnknownVoice(id))?;
        let n = self.voices.len();
        let layer_duration = if self.layered_intro || self.layered_outro {
            self.layer_duration()?
        } else {
            Fraction::ZERO
        };

        let mut notes = Vec::new();
        if self.layered_intro {
            notes.extend(self.layers(
                voice,
                layer_duration,
                |layer| NoteSource::intro_layer(id, layer),
                |layer| layer + 1 + index >= n,
            )?);
        }
        for section in &self.sections {
            let key = VoiceSection::new(id, section.id);
            let result = self
                .results
                .get(&key)
                .ok_or(MusicError::UnknownSection(section.id))?;
            let duration = self.declared_section_duration(section)?;
            notes.extend(fill_to_duration(result, duration)?.notes);
        }
        if self.layered_outro {
            notes.extend(self.layers(
                voice,
                layer_duration,
                |layer| NoteSource::outro_layer(id, layer),
                |layer| layer <= index,
            )?);
        }

        let mut list = NoteList::new(notes);
        list.instrument = voice.instrument.clone();
        list.normalized_rests()
    }

    /// Every voice's entire sequence, in voice order.
    pub fn entire_piece(&mut self) -> Result<Vec<(VoiceId, NoteList)>, MusicError> {
        self.generate_voice_sections()?;
        self.voices
            .iter()
            .map(|v| Ok((v.id, self.assemble_voice(v.id)?)))
            .collect()
    }

    /// Key in force at the start of each part of the piece, as
    /// (time in whole notes, key) pairs with repeats removed.
    fn key_signature_changes(&self) -> Result<Vec<(Fraction, KeySignature)>, MusicError> {
        let piece_key = self.scale.key_signature();
        let layer_total = if self.layered_intro || self.layered_outro {
            self.layer_duration()?
                .times(Fraction::from_integer(self.voices.len() as i64))?
        } else {
            Fraction::ZERO
        };

        let mut changes: Vec<(Fraction, KeySignature)> = vec![(Fraction::ZERO, piece_key)];

        let mut now = if self.layered_intro {
            layer_total
        } else {
            Fraction::ZERO
        };
        for section in &self.sections {
            let key = section.scale.unwrap_or(self.scale).key_signature();
            push_key_change(&mut changes, now, key);
            now = now.plus(self.declared_section_duration(section)?)?;
        }
        if self.layered_outro {
            push_key_change(&mut changes, now, piece_key);
        }
        changes.dedup_by(|b, a| a.1 == b.1);
        Ok(changes)
    }

    /// Generate everything and lay it out on the tick grid.
    pub fn timeline(&mut self) -> Result<Timeline, MusicError> {
        let voices = self.entire_piece()?;
        let key_changes = self.key_signature_changes()?;
        build_timeline(
            &voices,
            &key_changes,
            TimelineSettings {
                tempo_bpm: self.tempo_bpm,
                time_signature: self.time_signature,
                max_tick_resolution: self.max_tick_resolution,
            },
        )
    }
}

/// Record that `key` is in force from `time`. A change at the same time as
/// the previous one replaces it; a repeat of the current key is dropped.
fn push_key_change(changes: &mut Vec<(Fraction, KeySignature)>, time: Fraction, key: KeySignature) {
    if let Some(last) = changes.last_mut() {
        if last.0 == time {
            last.1 = key;
            return;
        }
        if last.1 == key {
            return;
        }
    }
    changes.push((time, key));
}

/// Repeat `list` until it lasts `target`, dropping notes past the end and
/// clipping the one that crosses it.
pub fn fill_to_duration(list: &NoteList, target: Fraction) -> Result<NoteList, MusicError> {
    let mut out = NoteList {
        notes: Vec::new(),
        instrument: list.instrument.clone(),
    };
    if !target.is_positive() {
        return Ok(out);
    }
    if !list.duration()?.is_positive() {
        out.notes.push(Note::rest(target));
        return Ok(out);
    }

    let mut filled = Fraction::ZERO;
    for note in list.iter().cycle() {
        let remaining = target.minus(filled)?;
        if !remaining.is_positive() {
            break;
        }
        if !note.duration.is_positive() {
            continue;
        }
        let mut note = note.clone();
        if note.duration > remaining {
            note.duration = remaining;
        }
        filled = filled.plus(note.duration)?;
        out.notes.push(note);
    }
    Ok(out)
}
