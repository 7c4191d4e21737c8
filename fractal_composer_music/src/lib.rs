// Fractal Composer
//
// Generates music by self-similarity: a short germ melody is expanded so
// that every note of it is replaced by a transposed, time-compressed copy of
// the whole germ, recursively. Several voices play the expansion at
// different octaves and speeds across a sequence of sections, each of which
// may invert or reverse the material. All timing is exact rational
// arithmetic until the final tick layout.
//
// Architecture:
// - note.rs: Notes, note lists, voice/section ids, and note provenance
// - scale.rs: Scale kinds, note names, key signatures, pitch mapping
// - germ.rs: Parser for germ strings like "G4,1/4 A4,1/8,FF R,1/8"
// - transform.rs: The `Transformer` trait plus octave, duration, retrograde
//   and inversion transformers
// - self_similarity.rs: The recursive self-similarity expansion
// - time_signature.rs: Validated time signatures
// - piece.rs: Voices, sections, cached voice-section results, assembly with
//   layered intro/outro
// - timeline.rs: Tick resolution and the integer-tick timeline renderers use
// - config.rs: JSON piece configuration
// - error.rs: `MusicError` and its kinds
//
// Exact fractions live in the sibling crate `fractal_composer_fraction`.

pub mod config;
pub mod error;
pub mod germ;
pub mod note;
pub mod piece;
pub mod scale;
pub mod self_similarity;
pub mod time_signature;
pub mod timeline;
pub mod transform;
