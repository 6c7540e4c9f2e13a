//! # WAV Container Writer
//!
//! Wraps raw PCM in the canonical 44-byte RIFF/WAVE header so the synthesized
//! speech can be downloaded and opened by ordinary audio tools.
//!
//! ## Header Layout (little-endian):
//! ```text
//! 0  "RIFF"        4  36 + data_size   8  "WAVE"
//! 12 "fmt "        16 16               20 1 (PCM)
//! 22 channels      24 sample_rate      28 byte_rate
//! 32 block_align   34 16               36 "data"
//! 40 data_size     44.. payload
//! ```
//! There is no padding and there are no extension chunks.

use crate::audio::pcm::{AudioFormat, BITS_PER_SAMPLE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

/// Size of the fixed header that precedes the payload.
pub const WAV_HEADER_LEN: usize = 44;

const PCM_FORMAT_TAG: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;

/// Build a complete WAV file in memory.
///
/// ## Behavior:
/// - The payload is copied byte-for-byte; nothing checks that it is valid PCM
/// - An empty payload yields a 44-byte file with `data_size = 0`
/// - Size fields saturate at `u32::MAX` if the payload cannot be described by RIFF
pub fn to_wav_container(raw: &[u8], format: &AudioFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(WAV_HEADER_LEN + raw.len());
    // Writing into a Vec cannot fail
    let _ = write_wav(&mut out, raw, format);
    out
}

/// Stream a WAV file (header then payload) into any writer.
pub fn write_wav<W: Write>(writer: &mut W, raw: &[u8], format: &AudioFormat) -> io::Result<()> {
    write_header(writer, raw.len(), format)?;
    writer.write_all(raw)
}

fn write_header<W: Write>(writer: &mut W, data_len: usize, format: &AudioFormat) -> io::Result<()> {
    let data_size = u32::try_from(data_len).unwrap_or(u32::MAX);
    let block_align = format.channel_count.saturating_mul(2);
    let byte_rate = format.sample_rate.saturating_mul(block_align as u32);

    writer.write_all(b"RIFF")?;
    writer.write_u32::<LittleEndian>(data_size.saturating_add(36))?;
    writer.write_all(b"WAVE")?;

    writer.write_all(b"fmt ")?;
    writer.write_u32::<LittleEndian>(FMT_CHUNK_LEN)?;
    writer.write_u16::<LittleEndian>(PCM_FORMAT_TAG)?;
    writer.write_u16::<LittleEndian>(format.channel_count)?;
    writer.write_u32::<LittleEndian>(format.sample_rate)?;
    writer.write_u32::<LittleEndian>(byte_rate)?;
    writer.write_u16::<LittleEndian>(block_align)?;
    writer.write_u16::<LittleEndian>(BITS_PER_SAMPLE)?;

    writer.write_all(b"data")?;
    writer.write_u32::<LittleEndian>(data_size)?;
    Ok(())
}

/// Parsed view of a 44-byte WAV header.
///
/// Reads back headers written by this module (download logging, tests); it does
/// not try to understand WAV files produced elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub chunk_size: u32,
    pub audio_format: u16,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

impl WavHeader {
    pub fn parse(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < WAV_HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("WAV header needs {} bytes, got {}", WAV_HEADER_LEN, bytes.len()),
            ));
        }

        let mut cursor = Cursor::new(&bytes[..WAV_HEADER_LEN]);
        expect_tag(&mut cursor, b"RIFF")?;
        let chunk_size = cursor.read_u32::<LittleEndian>()?;
        expect_tag(&mut cursor, b"WAVE")?;
        expect_tag(&mut cursor, b"fmt ")?;
        let fmt_len = cursor.read_u32::<LittleEndian>()?;
        if fmt_len != FMT_CHUNK_LEN {
            return Err(invalid(format!("unexpected fmt chunk length {}", fmt_len)));
        }
        let audio_format = cursor.read_u16::<LittleEndian>()?;
        let channel_count = cursor.read_u16::<LittleEndian>()?;
        let sample_rate = cursor.read_u32::<LittleEndian>()?;
        let byte_rate = cursor.read_u32::<LittleEndian>()?;
        let block_align = cursor.read_u16::<LittleEndian>()?;
        let bits_per_sample = cursor.read_u16::<LittleEndian>()?;
        expect_tag(&mut cursor, b"data")?;
        let data_size = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            chunk_size,
            audio_format,
            channel_count,
            sample_rate,
            byte_rate,
            block_align,
            bits_per_sample,
            data_size,
        })
    }
}

fn expect_tag(cursor: &mut Cursor<&[u8]>, tag: &[u8; 4]) -> io::Result<()> {
    let mut found = [0u8; 4];
    cursor.read_exact(&mut found)?;
    if &found != tag {
        return Err(invalid(format!(
            "expected {:?}, found {:?}",
            String::from_utf8_lossy(tag),
            String::from_utf8_lossy(&found)
        )));
    }
    Ok(())
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
