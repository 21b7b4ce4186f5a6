//! Batch preset renderer.
//!
//! Takes one preset JSON file or a directory of presets, renders each
//! through the fdn-dsp engine, and writes 32-bit float WAVs next to a
//! per-preset status line.

use clap::Parser;
use fdn_dsp::{render, RenderParams, RenderStatus};
use hound::{SampleFormat, WavSpec, WavWriter};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "fdn-render", about = "Offline FDN preset renderer")]
struct Cli {
    /// Preset JSON file, or a directory of presets
    #[arg()]
    preset: String,

    /// Output directory
    #[arg(short, long, default_value = "render_output")]
    output: String,

    /// Override the preset seed
    #[arg(long)]
    seed: Option<u64>,

    /// Number of worker threads (0 = auto)
    #[arg(long, default_value_t = 0)]
    workers: usize,
}

fn write_wav(path: &Path, channels: &[Vec<f64>], sample_rate: f64) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: channels.len() as u16,
        sample_rate: sample_rate as u32,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    let frames = channels.iter().map(|ch| ch.len()).max().unwrap_or(0);
    for frame in 0..frames {
        for channel in channels {
            let sample = channel.get(frame).copied().unwrap_or(0.0);
            writer.write_sample(sample as f32)?;
        }
    }
    writer.finalize()
}

fn collect_presets(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let mut presets = Vec::new();
    if let Ok(entries) = fs::read_dir(root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                presets.push(path);
            }
        }
    }
    presets.sort();
    presets
}

fn render_preset(path: &Path, out_dir: &Path, seed_override: Option<u64>) -> Result<RenderStatus, String> {
    let json = fs::read_to_string(path).map_err(|e| format!("read failed: {e}"))?;
    let mut params = RenderParams::from_json(&json).map_err(|e| format!("parse failed: {e}"))?;
    if let Some(seed) = seed_override {
        params.seed = seed;
    }

    let output = render(&params);

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "preset".to_string());
    let wav_path = out_dir.join(format!("{stem}.wav"));
    let tmp_path = wav_path.with_extension("wav.part");
    write_wav(&tmp_path, &output.channels, output.sample_rate)
        .map_err(|e| format!("wav write failed: {e}"))?;
    fs::rename(&tmp_path, &wav_path).map_err(|e| format!("rename failed: {e}"))?;

    Ok(output.status)
}

fn main() {
    let cli = Cli::parse();

    if cli.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.workers)
            .build_global()
            .unwrap();
    }

    let presets = collect_presets(Path::new(&cli.preset));
    if presets.is_empty() {
        eprintln!("No presets found at {}", cli.preset);
        std::process::exit(1);
    }

    let out_dir = PathBuf::from(&cli.output);
    fs::create_dir_all(&out_dir).unwrap();

    println!("Rendering {} presets to {}/", presets.len(), out_dir.display());

    let start = Instant::now();
    let ok_count = AtomicUsize::new(0);
    let silent_count = AtomicUsize::new(0);
    let fail_count = AtomicUsize::new(0);

    presets.par_iter().for_each(|preset| {
        let name = preset.file_name().map(|s| s.to_string_lossy().to_string());
        let name = name.as_deref().unwrap_or("?");
        match render_preset(preset, &out_dir, cli.seed) {
            Ok(RenderStatus::Ok) => {
                ok_count.fetch_add(1, Ordering::Relaxed);
                println!("  ok      {name}");
            }
            Ok(RenderStatus::Silent) => {
                silent_count.fetch_add(1, Ordering::Relaxed);
                println!("  SILENT  {name}");
            }
            Err(message) => {
                fail_count.fetch_add(1, Ordering::Relaxed);
                eprintln!("  FAILED  {name}: {message}");
            }
        }
    });

    let elapsed = start.elapsed().as_secs_f32();
    let ok = ok_count.load(Ordering::Relaxed);
    let silent = silent_count.load(Ordering::Relaxed);
    let fail = fail_count.load(Ordering::Relaxed);
    println!("Done in {elapsed:.1}s: {ok} ok, {silent} silent, {fail} failed");
    if fail > 0 {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_wav_round_trips() {
        let mut params = RenderParams::default();
        params.size = 4;
        params.duration_seconds = 0.05;
        params.stereo = true;
        let output = render(&params);

        let path = std::env::temp_dir().join(format!("fdn-render-smoke-{}.wav", std::process::id()));
        write_wav(&path, &output.channels, output.sample_rate).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 48000);
        assert_eq!(spec.sample_format, SampleFormat::Float);
        assert_eq!(spec.bits_per_sample, 32);

        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 2 * output.channels[0].len());
        // Interleaving: frame 0 holds the first sample of each channel.
        assert_eq!(samples[0], output.channels[0][0] as f32);
        assert_eq!(samples[1], output.channels[1][0] as f32);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn preset_collection_accepts_file_or_directory() {
        let dir = std::env::temp_dir().join(format!("fdn-render-presets-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let a = dir.join("a.json");
        let b = dir.join("b.json");
        std::fs::write(&a, "{}").unwrap();
        std::fs::write(&b, "{}").unwrap();
        std::fs::write(dir.join("notes.txt"), "skip me").unwrap();

        assert_eq!(collect_presets(&a), vec![a.clone()]);
        assert_eq!(collect_presets(&dir), vec![a, b]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
