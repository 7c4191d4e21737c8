// Fractal Composer -- CLI entry point.
//
// Builds a piece from a JSON config (or the built-in demo piece), generates
// every voice, lays the result out on a tick grid, and writes the timeline as
// JSON. Set RUST_LOG=debug to watch the expansion.
//
// Usage:
//   cargo run -p fractal_composer_music --bin generate -- [config.json]
//     [--out timeline.json] [--iterations N] [--tempo BPM] [--layered]

use fractal_composer_music::config::PieceConfig;
use fractal_composer_music::error::MusicError;
use fractal_composer_music::timeline::Timeline;
use std::path::Path;

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    let config_path = args
        .get(1)
        .filter(|s| !s.starts_with("--"))
        .map(|s| s.as_str());
    let output_path: String =
        parse_flag(&args, "--out").unwrap_or_else(|| "timeline.json".to_string());
    let iterations: Option<u32> = parse_flag(&args, "--iterations");
    let tempo: Option<u32> = parse_flag(&args, "--tempo");
    let layered = args.iter().any(|a| a == "--layered");

    println!("=== Fractal Composer ===");
    println!("Output: {}", output_path);
    println!();

    if let Err(e) = run(config_path, &output_path, iterations, tempo, layered) {
        eprintln!("  Error: {}", e);
        std::process::exit(1);
    }
}

fn run(
    config_path: Option<&str>,
    output_path: &str,
    iterations: Option<u32>,
    tempo: Option<u32>,
    layered: bool,
) -> Result<(), MusicError> {
    println!("[1/4] Loading configuration...");
    let mut config = match config_path {
        Some(path) => {
            println!("  Reading {}", path);
            PieceConfig::load(Path::new(path))?
        }
        None => {
            println!("  No config given, using the demo piece.");
            PieceConfig::default()
        }
    };
    if let Some(t) = tempo {
        config.tempo_bpm = t;
    }
    if layered {
        config.layered_intro = true;
        config.layered_outro = true;
    }

    println!("[2/4] Building piece...");
    let mut piece = config.build()?;
    if let Some(n) = iterations {
        let ids: Vec<_> = piece.sections().iter().map(|s| s.id).collect();
        for id in ids {
            let mut settings = piece.section(id)?.settings;
            settings.self_similarity.iterations = n;
            piece.set_section_settings(id, settings)?;
        }
    }
    println!("  Germ: {} ({} notes)", piece.germ_text(), piece.germ().len());
    println!("  Scale: {}", piece.scale());
    println!(
        "  {} voices, {} sections, tempo {} BPM, time {}",
        piece.voices().len(),
        piece.sections().len(),
        piece.tempo_bpm(),
        piece.time_signature()
    );

    println!("[3/4] Generating voices...");
    let timeline = piece.timeline()?;
    print_summary(&timeline);

    println!("[4/4] Writing timeline to {}...", output_path);
    let json = serde_json::to_string_pretty(&timeline)?;
    std::fs::write(output_path, json)?;
    println!("  Done!");
    Ok(())
}

fn print_summary(timeline: &Timeline) {
    println!(
        "  Resolution: {} ticks per quarter (rescale x{})",
        timeline.ticks_per_quarter, timeline.rescale_factor
    );
    for voice in &timeline.voices {
        let quarters = voice.total_ticks as f64 / timeline.ticks_per_quarter as f64;
        println!(
            "  Voice {} on channel {}: {} notes, {:.1} quarters ({})",
            voice.voice,
            voice.channel,
            voice.notes.len(),
            quarters,
            voice.instrument.as_deref().unwrap_or("no instrument")
        );
    }
    if timeline.key_signatures.len() > 1 {
        println!("  {} key changes", timeline.key_signatures.len() - 1);
    }
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
