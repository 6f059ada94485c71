//! # WAV Fragment Validation
//!
//! Every inbound fragment is a self-contained canonical WAV file: a 44-byte
//! RIFF/WAVE/fmt/data header followed by raw PCM. This module turns the raw
//! bytes into a typed header plus a borrowed payload slice, or explains exactly
//! which field is wrong.
//!
//! ## Canonical Header Layout (little-endian):
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 4 | `RIFF` |
//! | 4 | 4 | file size - 8 |
//! | 8 | 4 | `WAVE` |
//! | 12 | 4 | `fmt ` |
//! | 16 | 4 | fmt chunk length |
//! | 20 | 2 | format tag (1 = PCM) |
//! | 22 | 2 | channels |
//! | 24 | 4 | sample rate |
//! | 28 | 4 | byte rate |
//! | 32 | 2 | block align |
//! | 34 | 2 | bits per sample |
//! | 36 | 4 | `data` |
//! | 40 | 4 | data length |
//!
//! Validation is pure: no state, no I/O. Sample rate and bit depth are passed
//! through untouched; PCM-ness and mono are enforced here because everything
//! downstream assumes them.

use crate::error::ValidationError;
use byteorder::{ByteOrder, LittleEndian};

/// Size of the canonical header; the payload starts right after it.
pub const WAV_HEADER_LEN: usize = 44;

/// Format tag for linear PCM.
pub const PCM_FORMAT_TAG: u16 = 1;

/// Header fields of a validated fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bit_depth: u16,
    /// Data length as declared by the header; may disagree with the bytes actually sent.
    pub data_len: u32,
}

/// A fragment that passed validation.
///
/// Borrows the payload from the original bytes so no copy happens before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedFrame<'a> {
    pub header: WavHeader,
    pub payload: &'a [u8],
}

impl ValidatedFrame<'_> {
    /// Whether the declared data length matches the payload actually received.
    pub fn declared_len_matches(&self) -> bool {
        self.header.data_len as usize == self.payload.len()
    }

    /// Audio duration carried by the payload, 0 when the bit depth is below one byte.
    pub fn duration_seconds(&self) -> f64 {
        let sample_width = usize::from(self.header.bit_depth / 8);
        if sample_width == 0 {
            return 0.0;
        }
        (self.payload.len() / sample_width) as f64 / f64::from(self.header.sample_rate)
    }
}

/// Validate a raw fragment.
///
/// ## Checks, in order:
/// 1. At least 44 bytes (`TooShort`)
/// 2. `RIFF`, `WAVE`, `fmt ` and `data` tags (`BadMagic`)
/// 3. Format tag is PCM, the stream is mono and has a sample rate (`UnsupportedFormat`)
pub fn validate(bytes: &[u8]) -> Result<ValidatedFrame<'_>, ValidationError> {
    if bytes.len() < WAV_HEADER_LEN {
        return Err(ValidationError::TooShort {
            len: bytes.len(),
            min: WAV_HEADER_LEN,
        });
    }

    expect_tag(bytes, 0, "RIFF", "RIFF")?;
    expect_tag(bytes, 8, "WAVE", "WAVE")?;
    expect_tag(bytes, 12, "fmt", "fmt ")?;
    expect_tag(bytes, 36, "data", "data")?;

    let header = WavHeader {
        format_tag: LittleEndian::read_u16(&bytes[20..22]),
        channels: LittleEndian::read_u16(&bytes[22..24]),
        sample_rate: LittleEndian::read_u32(&bytes[24..28]),
        byte_rate: LittleEndian::read_u32(&bytes[28..32]),
        block_align: LittleEndian::read_u16(&bytes[32..34]),
        bit_depth: LittleEndian::read_u16(&bytes[34..36]),
        data_len: LittleEndian::read_u32(&bytes[40..44]),
    };

    if header.format_tag != PCM_FORMAT_TAG {
        return Err(ValidationError::UnsupportedFormat(format!(
            "expected PCM format ({}), got {}",
            PCM_FORMAT_TAG, header.format_tag
        )));
    }

    if header.channels != 1 {
        return Err(ValidationError::UnsupportedFormat(format!(
            "expected mono audio (1 channel), got {} channels",
            header.channels
        )));
    }

    if header.sample_rate == 0 {
        return Err(ValidationError::UnsupportedFormat(
            "sample rate must be greater than 0".to_string(),
        ));
    }

    Ok(ValidatedFrame {
        header,
        payload: &bytes[WAV_HEADER_LEN..],
    })
}

fn expect_tag(
    bytes: &[u8],
    offset: usize,
    chunk: &'static str,
    expected: &'static str,
) -> Result<(), ValidationError> {
    let found = &bytes[offset..offset + 4];
    if found == expected.as_bytes() {
        Ok(())
    } else {
        Err(ValidationError::BadMagic {
            chunk,
            expected,
            found: String::from_utf8_lossy(found).into_owned(),
        })
    }
}

/// Build a canonical mono PCM WAV fragment around `payload`.
///
/// Used by tests and by clients written against this crate. Size fields that
/// do not fit in 32 bits saturate at `u32::MAX`, as does the byte rate.
pub fn encode_fragment(sample_rate: u32, bit_depth: u16, payload: &[u8]) -> Vec<u8> {
    let block_align = bit_depth / 8;
    let data_len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let mut out = vec![0u8; WAV_HEADER_LEN];

    out[0..4].copy_from_slice(b"RIFF");
    LittleEndian::write_u32(&mut out[4..8], data_len.saturating_add(36));
    out[8..12].copy_from_slice(b"WAVE");
    out[12..16].copy_from_slice(b"fmt ");
    LittleEndian::write_u32(&mut out[16..20], 16);
    LittleEndian::write_u16(&mut out[20..22], PCM_FORMAT_TAG);
    LittleEndian::write_u16(&mut out[22..24], 1);
    LittleEndian::write_u32(&mut out[24..28], sample_rate);
    LittleEndian::write_u32(&mut out[28..32], sample_rate.saturating_mul(u32::from(block_align)));
    LittleEndian::write_u16(&mut out[32..34], block_align);
    LittleEndian::write_u16(&mut out[34..36], bit_depth);
    out[36..40].copy_from_slice(b"data");
    LittleEndian::write_u32(&mut out[40..44], data_len);

    out.extend_from_slice(payload);
    out
}
