// src/codec/delta.rs
//! Lossless delta + zigzag + run-length codec over acquisition samples
//!
//! Wire layout: sample count, the first sample verbatim (varint fields,
//! length-prefixed name/unit), four RLE-compressed delta arrays (timestamp,
//! address, raw value, fixed-point scaled value), then per-sample
//! name/unit change flags. Scaled values are quantized to 1e-6.

use crate::acquisition::AcquisitionSample;
use crate::codec::varint::{decode_varint, encode_varint, zigzag_decode, zigzag_encode};
use crate::codec::CodecError;
use std::time::{Duration, Instant};

/// High bit of the first varint marks a multi-element run
const RLE_MARKER: u64 = 1 << 63;

/// Fixed-point scale for `scaled_value` (6 decimal places)
const SCALED_FIXED_SCALE: f64 = 1_000_000.0;

/// Outcome of a self-checked compression pass
#[derive(Debug, Clone)]
pub struct CompressionStats {
    pub original_size_bytes: usize,
    pub compressed_size_bytes: usize,
    pub compression_ratio: f64,
    pub compression_time: Duration,
    pub decompression_time: Duration,
    pub validation_passed: bool,
}

fn scaled_to_fixed(scaled: f64) -> i64 {
    (scaled * SCALED_FIXED_SCALE).round() as i64
}

fn fixed_to_scaled(fixed: i64) -> f64 {
    fixed as f64 / SCALED_FIXED_SCALE
}

fn encode_string(s: &str, output: &mut Vec<u8>) {
    encode_varint(s.len() as u64, output);
    output.extend_from_slice(s.as_bytes());
}

fn decode_string(data: &[u8], offset: &mut usize) -> Result<String, CodecError> {
    let len = decode_varint(data, offset)? as usize;
    if *offset + len > data.len() {
        return Err(CodecError::UnexpectedEof);
    }
    let bytes = &data[*offset..*offset + len];
    *offset += len;
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidString)
}

fn encode_rle_array(deltas: &[i64], output: &mut Vec<u8>) -> Result<(), CodecError> {
    encode_varint(deltas.len() as u64, output);

    let mut i = 0;
    while i < deltas.len() {
        let delta = deltas[i];
        let mut run_length = 1usize;
        while i + run_length < deltas.len() && deltas[i + run_length] == delta {
            run_length += 1;
        }

        let encoded = zigzag_encode(delta);
        if encoded & RLE_MARKER != 0 {
            // A delta this large cannot coexist with the run marker bit
            return Err(CodecError::DeltaOverflow);
        }

        if run_length > 1 {
            encode_varint(encoded | RLE_MARKER, output);
            encode_varint(run_length as u64, output);
        } else {
            encode_varint(encoded, output);
        }
        i += run_length;
    }

    Ok(())
}

fn decode_rle_array(data: &[u8], offset: &mut usize) -> Result<Vec<i64>, CodecError> {
    let count = decode_varint(data, offset)? as usize;
    let mut deltas = Vec::with_capacity(count);

    while deltas.len() < count {
        let first = decode_varint(data, offset)?;
        let (delta, run_length) = if first & RLE_MARKER != 0 {
            let delta = zigzag_decode(first & !RLE_MARKER);
            let run_length = decode_varint(data, offset)? as usize;
            (delta, run_length)
        } else {
            (zigzag_decode(first), 1)
        };

        if run_length == 0 {
            return Err(CodecError::InvalidRun);
        }
        for _ in 0..run_length {
            if deltas.len() == count {
                break;
            }
            deltas.push(delta);
        }
    }

    Ok(deltas)
}

/// Compress a batch of samples into the compact wire form.
///
/// An empty batch compresses to an empty byte vector. Encoding is
/// deterministic: equal inputs produce byte-identical output.
pub fn compress(samples: &[AcquisitionSample]) -> Result<Vec<u8>, CodecError> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let mut output = Vec::with_capacity(samples.len() * 8);
    encode_varint(samples.len() as u64, &mut output);

    let first = &samples[0];
    encode_varint(first.timestamp_nanos, &mut output);
    encode_varint(u64::from(first.register_address), &mut output);
    encode_varint(zigzag_encode(i64::from(first.raw_value)), &mut output);
    encode_varint(zigzag_encode(scaled_to_fixed(first.scaled_value)), &mut output);
    encode_string(&first.register_name, &mut output);
    encode_string(&first.unit, &mut output);

    let mut time_deltas = Vec::with_capacity(samples.len() - 1);
    let mut addr_deltas = Vec::with_capacity(samples.len() - 1);
    let mut raw_deltas = Vec::with_capacity(samples.len() - 1);
    let mut scaled_deltas = Vec::with_capacity(samples.len() - 1);

    let mut prev_fixed = scaled_to_fixed(first.scaled_value);
    for pair in samples.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);

        time_deltas.push(current.timestamp_nanos as i64 - previous.timestamp_nanos as i64);
        addr_deltas
            .push(i64::from(current.register_address) - i64::from(previous.register_address));
        raw_deltas.push(i64::from(current.raw_value) - i64::from(previous.raw_value));

        let fixed = scaled_to_fixed(current.scaled_value);
        scaled_deltas.push(fixed - prev_fixed);
        prev_fixed = fixed;
    }

    encode_rle_array(&time_deltas, &mut output)?;
    encode_rle_array(&addr_deltas, &mut output)?;
    encode_rle_array(&raw_deltas, &mut output)?;
    encode_rle_array(&scaled_deltas, &mut output)?;

    for pair in samples.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);

        if current.register_name != previous.register_name {
            output.push(1);
            encode_string(&current.register_name, &mut output);
        } else {
            output.push(0);
        }

        if current.unit != previous.unit {
            output.push(1);
            encode_string(&current.unit, &mut output);
        } else {
            output.push(0);
        }
    }

    Ok(output)
}

fn decode_flag(data: &[u8], offset: &mut usize) -> Result<bool, CodecError> {
    if *offset >= data.len() {
        return Err(CodecError::UnexpectedEof);
    }
    let flag = data[*offset];
    *offset += 1;
    match flag {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CodecError::InvalidFlag(other)),
    }
}

/// Decompress a byte stream produced by [`compress`].
///
/// Truncated or malformed input is rejected as a parse error.
pub fn decompress(data: &[u8]) -> Result<Vec<AcquisitionSample>, CodecError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let mut offset = 0;
    let count = decode_varint(data, &mut offset)? as usize;
    if count == 0 {
        return Ok(Vec::new());
    }

    let timestamp_nanos = decode_varint(data, &mut offset)?;
    let register_address = decode_varint(data, &mut offset)?;
    if register_address > u64::from(u8::MAX) {
        return Err(CodecError::AddressRange(register_address as i64));
    }
    let raw_value = zigzag_decode(decode_varint(data, &mut offset)?);
    if i32::try_from(raw_value).is_err() {
        return Err(CodecError::RawValueRange(raw_value));
    }
    let mut fixed = zigzag_decode(decode_varint(data, &mut offset)?);
    let register_name = decode_string(data, &mut offset)?;
    let unit = decode_string(data, &mut offset)?;

    let mut samples = Vec::with_capacity(count);
    samples.push(AcquisitionSample {
        timestamp_nanos,
        register_address: register_address as u8,
        register_name,
        raw_value: raw_value as i32,
        scaled_value: fixed_to_scaled(fixed),
        unit,
    });

    let time_deltas = decode_rle_array(data, &mut offset)?;
    let addr_deltas = decode_rle_array(data, &mut offset)?;
    let raw_deltas = decode_rle_array(data, &mut offset)?;
    let scaled_deltas = decode_rle_array(data, &mut offset)?;

    let expected = count - 1;
    for (name, array) in [
        ("timestamp", &time_deltas),
        ("address", &addr_deltas),
        ("raw", &raw_deltas),
        ("scaled", &scaled_deltas),
    ] {
        if array.len() != expected {
            return Err(CodecError::ArrayLength {
                array: name,
                expected,
                actual: array.len(),
            });
        }
    }

    for i in 1..count {
        let previous = &samples[i - 1];
        let delta_idx = i - 1;

        let timestamp_nanos =
            (previous.timestamp_nanos as i64 + time_deltas[delta_idx]) as u64;

        let address = i64::from(previous.register_address) + addr_deltas[delta_idx];
        let register_address =
            u8::try_from(address).map_err(|_| CodecError::AddressRange(address))?;

        let raw = i64::from(previous.raw_value) + raw_deltas[delta_idx];
        let raw_value = i32::try_from(raw).map_err(|_| CodecError::RawValueRange(raw))?;

        fixed += scaled_deltas[delta_idx];

        let previous_name = previous.register_name.clone();
        let previous_unit = previous.unit.clone();

        let register_name = if decode_flag(data, &mut offset)? {
            decode_string(data, &mut offset)?
        } else {
            previous_name
        };
        let unit = if decode_flag(data, &mut offset)? {
            decode_string(data, &mut offset)?
        } else {
            previous_unit
        };

        samples.push(AcquisitionSample {
            timestamp_nanos,
            register_address,
            register_name,
            raw_value,
            scaled_value: fixed_to_scaled(fixed),
            unit,
        });
    }

    Ok(samples)
}

/// Compare two sample batches under the codec's loss model: timestamps
/// within 1 microsecond, scaled values within 1e-6, all other fields exact.
pub fn validate_samples(original: &[AcquisitionSample], decompressed: &[AcquisitionSample]) -> bool {
    if original.len() != decompressed.len() {
        return false;
    }

    original.iter().zip(decompressed).all(|(orig, decomp)| {
        let timestamp_diff = orig.timestamp_nanos.abs_diff(decomp.timestamp_nanos);
        timestamp_diff <= 1_000
            && orig.register_address == decomp.register_address
            && orig.raw_value == decomp.raw_value
            && (orig.scaled_value - decomp.scaled_value).abs() <= 1e-6
            && orig.register_name == decomp.register_name
            && orig.unit == decomp.unit
    })
}

/// Compress a batch and self-check it by decompressing and validating the
/// round trip before the payload leaves the device.
pub fn compress_with_stats(
    samples: &[AcquisitionSample],
) -> Result<(Vec<u8>, CompressionStats), CodecError> {
    let original_size_bytes = std::mem::size_of::<AcquisitionSample>() * samples.len();

    let compress_start = Instant::now();
    let compressed = compress(samples)?;
    let compression_time = compress_start.elapsed();

    let decompress_start = Instant::now();
    let decompressed = decompress(&compressed)?;
    let decompression_time = decompress_start.elapsed();

    let compression_ratio = if original_size_bytes > 0 {
        compressed.len() as f64 / original_size_bytes as f64
    } else {
        0.0
    };

    let stats = CompressionStats {
        original_size_bytes,
        compressed_size_bytes: compressed.len(),
        compression_ratio,
        compression_time,
        decompression_time,
        validation_passed: validate_samples(samples, &decompressed),
    };

    Ok((compressed, stats))
}
