//! Track formats and bit rates
//!
//! A bit rate is a small index into [`BIT_RATE_NUM_BITS`], the fixed table of
//! per-component bit widths used by the variable packed formats. Entry 0 is
//! reserved for tracks that are constant within a segment (stored as a single
//! 48-bit normalized sample) and the last entry marks raw storage (full f32
//! components taken from the raw clip stream).

/// Per-component bit widths indexed by bit rate
///
/// Entry 0 is the constant bit rate, the final entry is the raw bit rate.
pub const BIT_RATE_NUM_BITS: [u8; 19] = [
    0, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 32,
];

/// Sentinel for tracks excluded from the variable search (constant or default
/// over the whole clip)
pub const INVALID_BIT_RATE: u8 = 0xFF;

/// Smallest bit rate usable when the segment is not normalized
pub const LOWEST_BIT_RATE: u8 = 1;

/// Largest table index (the raw bit rate)
pub const HIGHEST_BIT_RATE: u8 = (BIT_RATE_NUM_BITS.len() - 1) as u8;

/// Number of entries in the bit-rate table
pub const NUM_BIT_RATES: u8 = BIT_RATE_NUM_BITS.len() as u8;

/// Bits per component at the given bit rate
#[inline]
pub fn num_bits_at_bit_rate(bit_rate: u8) -> u32 {
    assert!(
        bit_rate <= HIGHEST_BIT_RATE,
        "Invalid bit rate: {}",
        bit_rate
    );
    BIT_RATE_NUM_BITS[bit_rate as usize] as u32
}

/// Track is constant within the segment, stored as one normalized sample
#[inline]
pub const fn is_constant_bit_rate(bit_rate: u8) -> bool {
    bit_rate == 0
}

/// Track stores raw full-precision components
#[inline]
pub const fn is_raw_bit_rate(bit_rate: u8) -> bool {
    bit_rate == HIGHEST_BIT_RATE
}

/// Rotation storage format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationFormat {
    /// Full precision quaternion, [x, y, z, w] stored as f32 (128 bits)
    QuatFull,
    /// Full precision quaternion, [x, y, z] stored as f32, w dropped (96 bits)
    QuatDropWFull,
    /// Quantized quaternion, [x, y, z] stored with N bits each, w dropped
    QuatDropWVariable,
}

impl RotationFormat {
    /// Whether this format participates in the variable bit-rate search
    #[inline]
    pub const fn is_variable(self) -> bool {
        matches!(self, RotationFormat::QuatDropWVariable)
    }

    /// Whether the W component is dropped and rebuilt at decode
    #[inline]
    pub const fn drops_w(self) -> bool {
        !matches!(self, RotationFormat::QuatFull)
    }

    /// Highest fixed precision of the same variant, used for clip-constant
    /// rotation tracks under a variable format
    #[inline]
    pub const fn highest_variant_precision(self) -> RotationFormat {
        match self {
            RotationFormat::QuatFull => RotationFormat::QuatFull,
            RotationFormat::QuatDropWFull | RotationFormat::QuatDropWVariable => {
                RotationFormat::QuatDropWFull
            }
        }
    }

    /// Packed sample width in bits for the fixed formats
    #[inline]
    pub fn packed_sample_bits(self) -> u32 {
        match self {
            RotationFormat::QuatFull => 128,
            RotationFormat::QuatDropWFull => 96,
            RotationFormat::QuatDropWVariable => {
                panic!("Variable rotation format has no fixed sample width")
            }
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            RotationFormat::QuatFull => "quat_full",
            RotationFormat::QuatDropWFull => "quat_drop_w_full",
            RotationFormat::QuatDropWVariable => "quat_drop_w_variable",
        }
    }
}

/// Translation/scale storage format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFormat {
    /// Full precision vector3, [x, y, z] stored as f32 (96 bits)
    Vector3Full,
    /// Quantized vector3, [x, y, z] stored with N bits each
    Vector3Variable,
}

impl VectorFormat {
    /// Whether this format participates in the variable bit-rate search
    #[inline]
    pub const fn is_variable(self) -> bool {
        matches!(self, VectorFormat::Vector3Variable)
    }

    /// Packed sample width in bits for the fixed formats
    #[inline]
    pub fn packed_sample_bits(self) -> u32 {
        match self {
            VectorFormat::Vector3Full => 96,
            VectorFormat::Vector3Variable => {
                panic!("Variable vector format has no fixed sample width")
            }
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            VectorFormat::Vector3Full => "vector3_full",
            VectorFormat::Vector3Variable => "vector3_variable",
        }
    }
}

/// Bit rates of one transform's three tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoneBitRate {
    pub rotation: u8,
    pub translation: u8,
    pub scale: u8,
}

impl BoneBitRate {
    pub const INVALID: BoneBitRate = BoneBitRate {
        rotation: INVALID_BIT_RATE,
        translation: INVALID_BIT_RATE,
        scale: INVALID_BIT_RATE,
    };

    /// Every track is constant or default, nothing to search
    #[inline]
    pub fn is_fully_invalid(&self) -> bool {
        self.rotation == INVALID_BIT_RATE
            && self.translation == INVALID_BIT_RATE
            && self.scale == INVALID_BIT_RATE
    }

    /// Every non-invalid track sits at the highest bit rate
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.rotation >= HIGHEST_BIT_RATE
            && self.translation >= HIGHEST_BIT_RATE
            && self.scale >= HIGHEST_BIT_RATE
    }
}
