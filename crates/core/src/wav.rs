// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! WAV byte-layout encoding (C11): a constant 44-byte PCM16 little-endian
//! header followed by interleaved samples. This module only ever produces
//! bytes in memory — reading or writing a WAV file is the caller's concern,
//! per §1's "WAV header encoding is referenced only as a byte layout".

/// Size in bytes of the header produced by [`encode`]/[`write_header`].
pub const HEADER_LEN: usize = 44;

/// Encodes `pcm` as a complete WAV byte buffer: header followed by the
/// little-endian PCM16 samples, per the byte layout in §6.1.
#[must_use]
pub fn encode(pcm: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_size = (pcm.len() * 2) as u32;
    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len() * 2);
    write_header(&mut out, data_size, sample_rate, channels);
    for sample in pcm {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Writes just the 44-byte header for `data_size` bytes of PCM16 payload.
/// Exposed separately so a streaming writer (e.g. the HTTP chunking
/// aggregator) can prepend a header to an already-concatenated PCM buffer
/// without re-copying the samples.
pub fn write_header(out: &mut Vec<u8>, data_size: u32, sample_rate: u32, channels: u16) {
    let byte_rate = sample_rate * u32::from(channels) * 2;
    let block_align = channels * 2;
    let total_size = data_size + HEADER_LEN as u32 - 8;

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&total_size.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM format tag
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
}

/// Wraps an already-assembled PCM16 buffer (`&[u8]`, little-endian samples)
/// as a complete WAV byte buffer without re-encoding the samples. Used by
/// the HTTP chunking aggregator, which accumulates raw little-endian bytes.
#[must_use]
pub fn wrap_pcm16_bytes(pcm_bytes: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + pcm_bytes.len());
    write_header(&mut out, pcm_bytes.len() as u32, sample_rate, channels);
    out.extend_from_slice(pcm_bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_matches_byte_offsets() {
        let wav = encode(&[1, -1, 100], 16000, 1);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), (44 - 8 + 6) as u32);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes(wav[16..20].try_into().unwrap()), 16);
        assert_eq!(u16::from_le_bytes(wav[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(wav[22..24].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 16000);
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 16000 * 1 * 2);
        assert_eq!(u16::from_le_bytes(wav[32..34].try_into().unwrap()), 2);
        assert_eq!(u16::from_le_bytes(wav[34..36].try_into().unwrap()), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 6);
        assert_eq!(wav.len(), HEADER_LEN + 6);
    }

    #[test]
    fn stereo_byte_rate_and_block_align() {
        let wav = encode(&[0, 0, 0, 0], 8000, 2);
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 8000 * 2 * 2);
        assert_eq!(u16::from_le_bytes(wav[32..34].try_into().unwrap()), 4);
    }

    #[test]
    fn wrap_pcm16_bytes_matches_encode() {
        let pcm = [1i16, -1, 100];
        let mut bytes = Vec::new();
        for s in pcm {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        assert_eq!(wrap_pcm16_bytes(&bytes, 16000, 1), encode(&pcm, 16000, 1));
    }
}
