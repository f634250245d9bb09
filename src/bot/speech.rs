//! Speech-to-text for voice notes using whisper-rs.
//!
//! Audio is converted to 16 kHz mono PCM with ffmpeg, cut into overlapping
//! segments and each segment is decoded separately. All of this is blocking
//! work, so it runs on tokio's blocking pool behind a semaphore.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

const SAMPLE_RATE: usize = 16_000;
/// Length of one recognised segment.
pub const SEGMENT_MS: usize = 120_000;
/// Audio repeated at the start of every segment after the first.
pub const OVERLAP_MS: usize = 250;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("whisper model not found at {0}")]
    ModelNotFound(PathBuf),
    #[error("whisper error: {0}")]
    Whisper(#[from] whisper_rs::WhisperError),
    #[error("failed to run ffmpeg: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),
    #[error("speech worker pool closed")]
    PoolClosed,
    #[error("speech worker panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct SpeechToText {
    ctx: Arc<WhisperContext>,
    permits: Arc<Semaphore>,
}

impl SpeechToText {
    /// Load a Whisper model from a .bin file.
    pub fn new(model_path: &Path, workers: usize) -> Result<Self, SpeechError> {
        info!("Loading Whisper model from {:?}", model_path);
        if !model_path.exists() {
            return Err(SpeechError::ModelNotFound(model_path.to_path_buf()));
        }
        let path = model_path
            .to_str()
            .ok_or_else(|| SpeechError::ModelNotFound(model_path.to_path_buf()))?;
        let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())?;
        info!("Whisper model loaded ({} workers)", workers);
        Ok(Self { ctx: Arc::new(ctx), permits: Arc::new(Semaphore::new(workers)) })
    }

    /// Transcribe an audio file, one string per recognised segment.
    pub async fn transcribe(&self, audio: Vec<u8>) -> Result<Vec<String>, SpeechError> {
        let _permit = self.permits.acquire().await.map_err(|_| SpeechError::PoolClosed)?;
        let ctx = self.ctx.clone();
        tokio::task::spawn_blocking(move || transcribe_blocking(&ctx, &audio)).await?
    }
}

fn transcribe_blocking(ctx: &WhisperContext, audio: &[u8]) -> Result<Vec<String>, SpeechError> {
    let pcm = convert_to_pcm(audio)?;
    let mut parts = Vec::new();
    for (start, end) in segment_bounds(pcm.len(), ms_to_samples(SEGMENT_MS), ms_to_samples(OVERLAP_MS)) {
        let text = decode_segment(ctx, &pcm[start..end])?;
        if !text.is_empty() {
            parts.push(text);
        }
    }
    info!("Transcribed voice note into {} part(s)", parts.len());
    Ok(parts)
}

fn decode_segment(ctx: &WhisperContext, pcm: &[f32]) -> Result<String, SpeechError> {
    let mut state = ctx.create_state()?;
    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_language(Some("auto"));
    params.set_translate(false);
    params.set_no_timestamps(true);
    params.set_print_progress(false);
    state.full(params, pcm)?;

    let mut text = String::new();
    for segment in state.as_iter() {
        match segment.to_str() {
            Ok(s) => {
                text.push_str(s);
                text.push(' ');
            }
            Err(e) => warn!("Skipping undecodable whisper segment: {e}"),
        }
    }
    Ok(text.trim().to_string())
}

fn ms_to_samples(ms: usize) -> usize {
    ms * SAMPLE_RATE / 1000
}

/// Sample ranges of consecutive segments. Every segment but the first starts
/// `overlap` samples early.
pub fn segment_bounds(total: usize, segment: usize, overlap: usize) -> Vec<(usize, usize)> {
    if total == 0 {
        return Vec::new();
    }
    (0..total.div_ceil(segment))
        .map(|i| {
            let start = (i * segment).saturating_sub(if i == 0 { 0 } else { overlap });
            let end = ((i + 1) * segment).min(total);
            (start, end)
        })
        .collect()
}

/// Convert any ffmpeg-readable audio to 16 kHz mono f32 samples.
fn convert_to_pcm(audio: &[u8]) -> Result<Vec<f32>, SpeechError> {
    // ffmpeg needs seekable input for OGG
    let input_path = std::env::temp_dir().join(format!("gptbot_voice_{}.ogg", Uuid::new_v4()));
    std::fs::write(&input_path, audio)?;

    let output = Command::new("ffmpeg")
        .arg("-i")
        .arg(&input_path)
        .args(["-ar", "16000", "-ac", "1", "-f", "s16le", "-acodec", "pcm_s16le", "-y", "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    if let Err(e) = std::fs::remove_file(&input_path) {
        warn!("Temp voice file {:?} not deleted: {e}", input_path);
    }
    let output = output?;

    if !output.status.success() {
        return Err(SpeechError::Ffmpeg(String::from_utf8_lossy(&output.stderr).into_owned()));
    }

    let samples: Vec<f32> = output
        .stdout
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect();
    debug!("Converted to {} f32 samples", samples.len());
    Ok(samples)
}
