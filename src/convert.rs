//! Sample-format conversion between the backend's native `f32` and whichever
//! format the guest selected.
//!
//! The backend always hands over 32-bit floats in `[-1.0, 1.0]`. The guest
//! picks exactly one of three formats at build/configuration time; there is
//! no per-call negotiation. Every conversion here is pure, branchless and
//! allocation-free so it is safe to call from the rendezvous hot path.

/// The sample format the driver advertises to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 32-bit IEEE float, little-endian — a straight memcpy against the
    /// backend's native format.
    Float32LE,
    /// 32-bit signed integer, little-endian, full range.
    Int32LE,
    /// 16-bit signed integer, little-endian, full range.
    Int16LE,
}

impl SampleFormat {
    /// Size of one sample in this format, in bytes.
    pub const fn sample_bytes(self) -> usize {
        match self {
            SampleFormat::Float32LE => 4,
            SampleFormat::Int32LE => 4,
            SampleFormat::Int16LE => 2,
        }
    }
}

/// `float → int32`: `round(x * 0x7fffffff)`, saturating.
#[inline]
pub fn f32_to_i32(sample: f32) -> i32 {
    let scaled = (sample as f64) * (i32::MAX as f64);
    scaled.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// `int32 → float`: `x / (float)0x7fffffff`.
#[inline]
pub fn i32_to_f32(sample: i32) -> f32 {
    (sample as f64 / i32::MAX as f64) as f32
}

/// `float → int16`: `round(x * 0x7fff)`, saturating.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let scaled = (sample as f64) * (i16::MAX as f64);
    scaled.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// `int16 → float`: `x / (float)0x7fff`.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    (sample as f64 / i16::MAX as f64) as f32
}

/// Converts one backend-native frame of floats into `dst`, in the given
/// format, appending raw little-endian bytes. `dst` must already have
/// `src.len() * fmt.sample_bytes()` bytes of capacity reserved; this never
/// allocates.
pub fn encode(fmt: SampleFormat, src: &[f32], dst: &mut [u8]) {
    debug_assert_eq!(dst.len(), src.len() * fmt.sample_bytes());
    match fmt {
        SampleFormat::Float32LE => {
            for (chunk, &s) in dst.chunks_exact_mut(4).zip(src) {
                chunk.copy_from_slice(&s.to_le_bytes());
            }
        }
        SampleFormat::Int32LE => {
            for (chunk, &s) in dst.chunks_exact_mut(4).zip(src) {
                chunk.copy_from_slice(&f32_to_i32(s).to_le_bytes());
            }
        }
        SampleFormat::Int16LE => {
            for (chunk, &s) in dst.chunks_exact_mut(2).zip(src) {
                chunk.copy_from_slice(&f32_to_i16(s).to_le_bytes());
            }
        }
    }
}

/// Converts raw little-endian bytes in the guest's format back into
/// backend-native floats. `src` must be `dst.len() * fmt.sample_bytes()`
/// bytes long.
pub fn decode(fmt: SampleFormat, src: &[u8], dst: &mut [f32]) {
    debug_assert_eq!(src.len(), dst.len() * fmt.sample_bytes());
    match fmt {
        SampleFormat::Float32LE => {
            for (chunk, d) in src.chunks_exact(4).zip(dst) {
                *d = f32::from_le_bytes(chunk.try_into().unwrap());
            }
        }
        SampleFormat::Int32LE => {
            for (chunk, d) in src.chunks_exact(4).zip(dst) {
                *d = i32_to_f32(i32::from_le_bytes(chunk.try_into().unwrap()));
            }
        }
        SampleFormat::Int16LE => {
            for (chunk, d) in src.chunks_exact(2).zip(dst) {
                *d = i16_to_f32(i16::from_le_bytes(chunk.try_into().unwrap()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_round_trip_is_exact() {
        for s in [-1.0f32, -0.5, 0.0, 0.25, 0.999, 1.0] {
            assert_eq!(i32_to_f32(f32_to_i32(s)).max(-1.0).min(1.0), (s).max(-1.0).min(1.0));
        }
    }

    #[test]
    fn int32_extremes_saturate_instead_of_overflow() {
        assert_eq!(f32_to_i32(1.0), i32::MAX);
        assert_eq!(f32_to_i32(-1.0), -i32::MAX);
        assert_eq!(f32_to_i32(2.0), i32::MAX);
        assert_eq!(f32_to_i32(-2.0), i32::MIN);
    }

    #[test]
    fn int16_extremes_saturate_instead_of_overflow() {
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), -i16::MAX);
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), i16::MIN);
    }

    #[test]
    fn encode_decode_round_trip_within_int16_quantization() {
        let src = [0.0f32, 0.5, -0.5, 0.999, -1.0];
        let mut bytes = vec![0u8; src.len() * SampleFormat::Int16LE.sample_bytes()];
        encode(SampleFormat::Int16LE, &src, &mut bytes);
        let mut back = vec![0.0f32; src.len()];
        decode(SampleFormat::Int16LE, &bytes, &mut back);
        for (a, b) in src.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1.0 / 32000.0, "{a} vs {b}");
        }
    }
}
