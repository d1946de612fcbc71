//! Track streams and stream containers
//!
//! A [`TrackStream`] owns the sample payload of one channel of one bone
//! within one segment. Strides are expressed in bits so the same container
//! carries raw f32 samples (128 bits), fixed packed formats (96/48 bits) and
//! tightly bit-packed variable samples (3xN bits): sample `i` starts at bit
//! `i * bits_per_sample`. Payloads are always over-allocated by
//! [`STREAM_PADDING`] zero bytes so the branchless 8-byte big-endian gathers
//! of the variable formats can read past the nominal end.

pub mod clip;
pub mod range;
pub mod sample;
pub mod segment;

#[cfg(test)]
mod tests;

use glam::Vec4;

use crate::formats::{RotationFormat, VectorFormat, INVALID_BIT_RATE};
use crate::packing::{pack_vector4_128, unpack_vector4_128};

/// Zero bytes appended past every nominal payload
///
/// Invariant of the allocator, not the accessors: unaligned 8-byte gathers at
/// any in-bounds bit offset stay inside the buffer.
pub const STREAM_PADDING: usize = 16;

/// A contiguous buffer of samples for one track
#[derive(Debug, Clone)]
pub struct TrackStream {
    data: Vec<u8>,
    num_samples: u32,
    bits_per_sample: u32,
    sample_rate: f32,
    bit_rate: u8,
}

impl TrackStream {
    /// Allocate a zero-filled stream
    pub fn new(num_samples: u32, bits_per_sample: u32, sample_rate: f32, bit_rate: u8) -> Self {
        let payload_len = Self::payload_len_for(num_samples, bits_per_sample);
        Self {
            data: vec![0u8; payload_len + STREAM_PADDING],
            num_samples,
            bits_per_sample,
            sample_rate,
            bit_rate,
        }
    }

    /// An empty stream holding no samples (default tracks commit to this)
    pub fn empty(sample_rate: f32) -> Self {
        Self::new(0, 0, sample_rate, INVALID_BIT_RATE)
    }

    #[inline]
    fn payload_len_for(num_samples: u32, bits_per_sample: u32) -> usize {
        ((num_samples as usize * bits_per_sample as usize) + 7) / 8
    }

    /// Nominal payload length in bytes, excluding padding
    #[inline]
    pub fn payload_len(&self) -> usize {
        Self::payload_len_for(self.num_samples, self.bits_per_sample)
    }

    /// Payload plus padding
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable payload plus padding
    #[inline]
    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn num_samples(&self) -> u32 {
        self.num_samples
    }

    #[inline]
    pub fn bits_per_sample(&self) -> u32 {
        self.bits_per_sample
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    #[inline]
    pub fn bit_rate(&self) -> u8 {
        self.bit_rate
    }

    #[inline]
    pub fn is_bit_rate_variable(&self) -> bool {
        self.bit_rate != INVALID_BIT_RATE
    }

    /// First bit of the given sample
    #[inline]
    pub fn sample_bit_offset(&self, sample_index: u32) -> u32 {
        debug_assert!(
            sample_index < self.num_samples,
            "Invalid sample index: {} >= {}",
            sample_index,
            self.num_samples
        );
        sample_index * self.bits_per_sample
    }

    /// Byte slice starting at the given sample, running to the buffer end
    ///
    /// Only valid for byte-aligned strides.
    #[inline]
    pub fn sample_bytes(&self, sample_index: u32) -> &[u8] {
        debug_assert!(
            self.bits_per_sample % 8 == 0,
            "Stream is bit-packed, samples are not byte addressable"
        );
        debug_assert!(
            sample_index < self.num_samples,
            "Invalid sample index: {} >= {}",
            sample_index,
            self.num_samples
        );
        &self.data[(sample_index as usize * (self.bits_per_sample as usize / 8))..]
    }

    /// Mutable variant of [`TrackStream::sample_bytes`]
    #[inline]
    pub fn sample_bytes_mut(&mut self, sample_index: u32) -> &mut [u8] {
        debug_assert!(
            self.bits_per_sample % 8 == 0,
            "Stream is bit-packed, samples are not byte addressable"
        );
        debug_assert!(
            sample_index < self.num_samples,
            "Invalid sample index: {} >= {}",
            sample_index,
            self.num_samples
        );
        &mut self.data[(sample_index as usize * (self.bits_per_sample as usize / 8))..]
    }

    /// Read a raw 4-lane sample (128-bit strided streams only)
    #[inline]
    pub fn raw_sample(&self, sample_index: u32) -> Vec4 {
        debug_assert!(self.bits_per_sample == 128, "Not a raw 4-lane stream");
        unpack_vector4_128(self.sample_bytes(sample_index))
    }

    /// Write a raw 4-lane sample (128-bit strided streams only)
    #[inline]
    pub fn set_raw_sample(&mut self, sample_index: u32, value: Vec4) {
        debug_assert!(self.bits_per_sample == 128, "Not a raw 4-lane stream");
        pack_vector4_128(value, self.sample_bytes_mut(sample_index));
    }
}

/// Rotation track stream with its storage format
#[derive(Debug, Clone)]
pub struct RotationTrackStream {
    pub stream: TrackStream,
    format: RotationFormat,
}

impl RotationTrackStream {
    pub fn new(stream: TrackStream, format: RotationFormat) -> Self {
        Self { stream, format }
    }

    #[inline]
    pub fn format(&self) -> RotationFormat {
        self.format
    }

    #[inline]
    pub fn num_samples(&self) -> u32 {
        self.stream.num_samples()
    }

    #[inline]
    pub fn bit_rate(&self) -> u8 {
        self.stream.bit_rate()
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.stream.sample_rate()
    }
}

/// Translation/scale track stream with its storage format
#[derive(Debug, Clone)]
pub struct VectorTrackStream {
    pub stream: TrackStream,
    format: VectorFormat,
}

impl VectorTrackStream {
    pub fn new(stream: TrackStream, format: VectorFormat) -> Self {
        Self { stream, format }
    }

    #[inline]
    pub fn format(&self) -> VectorFormat {
        self.format
    }

    #[inline]
    pub fn num_samples(&self) -> u32 {
        self.stream.num_samples()
    }

    #[inline]
    pub fn bit_rate(&self) -> u8 {
        self.stream.bit_rate()
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.stream.sample_rate()
    }
}

/// Componentwise value bounds of one track, taken over the raw clip
///
/// For rotation tracks the min/max are not valid rotations; the extent only
/// tells us whether the track is constant and what to rescale against.
#[derive(Debug, Clone, Copy)]
pub struct TrackStreamRange {
    min: Vec4,
    max: Vec4,
}

impl Default for TrackStreamRange {
    fn default() -> Self {
        Self {
            min: Vec4::ZERO,
            max: Vec4::ZERO,
        }
    }
}

impl TrackStreamRange {
    pub fn new(min: Vec4, max: Vec4) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn min(&self) -> Vec4 {
        self.min
    }

    #[inline]
    pub fn max(&self) -> Vec4 {
        self.max
    }

    #[inline]
    pub fn extent(&self) -> Vec4 {
        self.max - self.min
    }

    #[inline]
    pub fn center(&self) -> Vec4 {
        (self.max + self.min) * 0.5
    }

    /// Every component varies less than `threshold`
    #[inline]
    pub fn is_constant(&self, threshold: f32) -> bool {
        (self.max - self.min).abs().max_element() < threshold
    }
}

/// Ranges of one bone's three tracks
#[derive(Debug, Clone, Copy, Default)]
pub struct BoneRanges {
    pub rotation: TrackStreamRange,
    pub translation: TrackStreamRange,
    pub scale: TrackStreamRange,
}

/// The three streams of one bone within a segment
#[derive(Debug, Clone)]
pub struct BoneStreams {
    pub rotations: RotationTrackStream,
    pub translations: VectorTrackStream,
    pub scales: VectorTrackStream,

    pub is_rotation_constant: bool,
    pub is_rotation_default: bool,
    pub is_translation_constant: bool,
    pub is_translation_default: bool,
    pub is_scale_constant: bool,
    pub is_scale_default: bool,
}

impl BoneStreams {
    #[inline]
    pub fn is_rotation_animated(&self) -> bool {
        !self.is_rotation_constant && !self.is_rotation_default
    }

    #[inline]
    pub fn is_translation_animated(&self) -> bool {
        !self.is_translation_constant && !self.is_translation_default
    }

    #[inline]
    pub fn is_scale_animated(&self) -> bool {
        !self.is_scale_constant && !self.is_scale_default
    }
}
