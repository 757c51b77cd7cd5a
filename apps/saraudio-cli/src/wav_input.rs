// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Minimal WAV file reader feeding the demo's [`saraudio_engine::Recorder`].
//!
//! `saraudio_core::wav` only encodes (§1: "WAV header encoding is
//! referenced only as a byte layout"), so decoding the local sample file is
//! the demo's own file-I/O concern, not a library responsibility.

use std::io::Read;

/// A fully-loaded PCM16 WAV file: its format plus the interleaved samples.
pub struct WavFile {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

/// Reads `path` as a canonical PCM16 little-endian WAV file (the same
/// layout [`saraudio_core::wav::encode`] produces).
///
/// # Errors
///
/// Returns an error if the file cannot be read, isn't a `RIFF`/`WAVE`
/// container, or its `fmt ` chunk declares anything other than 16-bit PCM.
pub fn read(path: &str) -> anyhow::Result<WavFile> {
    let mut bytes = Vec::new();
    std::fs::File::open(path)?.read_to_end(&mut bytes)?;

    anyhow::ensure!(bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE", "not a RIFF/WAVE file");

    let mut sample_rate = None;
    let mut channels = None;
    let mut bits_per_sample = None;
    let mut data: Option<&[u8]> = None;

    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into()?) as usize;
        let body_start = pos + 8;
        let body_end = (body_start + chunk_size).min(bytes.len());
        let body = &bytes[body_start..body_end];

        match chunk_id {
            b"fmt " => {
                anyhow::ensure!(body.len() >= 16, "truncated fmt chunk");
                channels = Some(u16::from_le_bytes(body[2..4].try_into()?));
                sample_rate = Some(u32::from_le_bytes(body[4..8].try_into()?));
                bits_per_sample = Some(u16::from_le_bytes(body[14..16].try_into()?));
            }
            b"data" => data = Some(body),
            _ => {}
        }

        // Chunks are word-aligned: a chunk with odd size carries one pad byte.
        pos = body_start + chunk_size + (chunk_size % 2);
    }

    let sample_rate = sample_rate.ok_or_else(|| anyhow::anyhow!("missing fmt chunk"))?;
    let channels = channels.ok_or_else(|| anyhow::anyhow!("missing fmt chunk"))?;
    let data = data.ok_or_else(|| anyhow::anyhow!("missing data chunk"))?;
    anyhow::ensure!(bits_per_sample == Some(16), "only 16-bit PCM WAV files are supported");

    let samples = data.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();

    Ok(WavFile { sample_rate, channels, samples })
}
