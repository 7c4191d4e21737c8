// JSON piece configuration.
//
// `PieceConfig` is the serde mirror of a `Piece`: germ text, scale and key,
// time signature, tempo, intro/outro flags, and lists of voices and sections.
// Every field is optional in JSON (`#[serde(default)]`). An empty voice or
// section list means the built-in defaults from `Piece::create_default_voices`
// and `Piece::create_default_sections`. Textual values (fractions, note names,
// time signatures) are written as strings, e.g. `"speed_scale_factor": "1/2"`.
//
// `build()` validates everything eagerly and returns a ready `Piece`; nothing
// is generated until the piece is asked for results.

use crate::error::MusicError;
use crate::note::VoiceId;
use crate::piece::{DEFAULT_TEMPO_BPM, Piece, VoiceSectionSettings};
use crate::scale::{Letter, NoteName, Scale, ScaleKind};
use crate::self_similarity::SelfSimilaritySettings;
use crate::time_signature::TimeSignature;
use crate::timeline::{DEFAULT_MAX_TICK_RESOLUTION, MAX_CHANNELS};
use crate::transform::SectionTransform;
use fractal_composer_fraction::Fraction;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Germ used when a config does not name one.
pub const DEFAULT_GERM: &str = "G4,1/4 A4,1/8 B4,1/8 G4,1/4";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PieceConfig {
    pub germ: String,
    pub scale: ScaleKind,
    pub key: NoteName,
    pub time_signature: TimeSignature,
    pub tempo_bpm: u32,
    pub max_tick_resolution: i64,
    pub layered_intro: bool,
    pub layered_outro: bool,
    pub voices: Vec<VoiceConfig>,
    pub sections: Vec<SectionConfig>,
}

impl Default for PieceConfig {
    fn default() -> Self {
        PieceConfig {
            germ: DEFAULT_GERM.to_string(),
            scale: ScaleKind::Major,
            key: NoteName::natural(Letter::G),
            time_signature: TimeSignature::default(),
            tempo_bpm: DEFAULT_TEMPO_BPM,
            max_tick_resolution: DEFAULT_MAX_TICK_RESOLUTION,
            layered_intro: false,
            layered_outro: false,
            voices: Vec::new(),
            sections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub octave_adjustment: i32,
    pub speed_scale_factor: Fraction,
    pub instrument: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        VoiceConfig {
            octave_adjustment: 0,
            speed_scale_factor: Fraction::ONE,
            instrument: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionConfig {
    pub self_similarity: SelfSimilaritySettings,
    pub transform: SectionTransform,
    /// Scale kind for this section; the piece's when unset.
    pub scale: Option<ScaleKind>,
    /// Key for this section; the piece's when unset.
    pub key: Option<NoteName>,
    pub duration: Option<Fraction>,
    pub overrides: Vec<OverrideConfig>,
}

/// Settings for one voice (by index into `voices`) within a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideConfig {
    pub voice: usize,
    #[serde(default)]
    pub settings: VoiceSectionSettings,
}

impl SectionConfig {
    fn settings(&self) -> VoiceSectionSettings {
        VoiceSectionSettings::new(self.self_similarity, self.transform)
    }

    fn scale_override(&self, piece_scale: Scale) -> Result<Option<Scale>, MusicError> {
        if self.scale.is_none() && self.key.is_none() {
            return Ok(None);
        }
        let kind = self.scale.unwrap_or(piece_scale.kind());
        let key = self.key.unwrap_or(piece_scale.key());
        Ok(Some(Scale::new(kind, key)?))
    }
}

impl PieceConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn load(path: &Path) -> Result<Self, MusicError> {
        let data = std::fs::read_to_string(path)?;
        Ok(PieceConfig::from_json(&data)?)
    }

    /// Validate the configuration and assemble a `Piece` from it.
    pub fn build(&self) -> Result<Piece, MusicError> {
        if self.voices.len() > MAX_CHANNELS {
            return Err(MusicError::TooManyVoices {
                count: self.voices.len(),
                max: MAX_CHANNELS,
            });
        }
        let scale = Scale::new(self.scale, self.key)?;
        let mut piece = Piece::new(scale);
        piece.set_germ(&self.germ)?;
        piece.set_time_signature(self.time_signature);
        piece.set_tempo_bpm(self.tempo_bpm);
        piece.set_max_tick_resolution(self.max_tick_resolution);
        piece.set_layered_intro(self.layered_intro);
        piece.set_layered_outro(self.layered_outro);

        if self.voices.is_empty() {
            piece.create_default_voices()?;
        } else {
            for voice in &self.voices {
                piece.add_voice(
                    voice.octave_adjustment,
                    voice.speed_scale_factor,
                    voice.instrument.clone(),
                )?;
            }
        }
        let voice_ids: Vec<VoiceId> = piece.voices().iter().map(|v| v.id).collect();

        if self.sections.is_empty() {
            piece.create_default_sections();
        } else {
            for section in &self.sections {
                let id = piece.add_section(section.settings());
                piece.set_section_scale(id, section.scale_override(scale)?)?;
                piece.set_section_duration(id, section.duration)?;
                for o in &section.overrides {
                    let voice = voice_ids
                        .get(o.voice)
                        .copied()
                        .ok_or(MusicError::UnknownVoice(VoiceId(o.voice as u32)))?;
                    piece.set_voice_section_settings(voice, id, Some(o.settings))?;
                }
            }
        }

        info!(
            "built piece in {}: {} germ notes, {} voices, {} sections",
            scale,
            piece.germ().len(),
            piece.voices().len(),
            piece.sections().len()
        );
        Ok(piece)
    }
}
