//! Value modes.
//!
//! Every node has a mode describing the kind of value it produces: an integer of a particular
//! width and signedness, a floating point format, an address, or one of the non-data kinds used
//! by the graph itself (memory state, control flow, tuples). Modes are a closed set represented
//! as a compact 8-bit index, so they can be stored in every node and compared cheaply.

use core::fmt;

/// The mode of an SSA value.
///
/// The `INVALID` mode is used as the default, and is never the mode of a constructed node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Mode(u8);

impl Mode {
    /// Not a valid mode.
    pub const INVALID: Self = Self(0);
    /// Signed 8-bit integer.
    pub const IS8: Self = Self(1);
    /// Signed 16-bit integer.
    pub const IS16: Self = Self(2);
    /// Signed 32-bit integer.
    pub const IS32: Self = Self(3);
    /// Signed 64-bit integer.
    pub const IS64: Self = Self(4);
    /// Unsigned 8-bit integer.
    pub const IU8: Self = Self(5);
    /// Unsigned 16-bit integer.
    pub const IU16: Self = Self(6);
    /// Unsigned 32-bit integer.
    pub const IU32: Self = Self(7);
    /// Unsigned 64-bit integer.
    pub const IU64: Self = Self(8);
    /// IEEE 754 single precision float.
    pub const F32: Self = Self(9);
    /// IEEE 754 double precision float.
    pub const F64: Self = Self(10);
    /// An address.
    pub const P: Self = Self(11);
    /// The internal boolean produced by comparisons.
    pub const B: Self = Self(12);
    /// Memory state.
    pub const M: Self = Self(13);
    /// Control flow.
    pub const X: Self = Self(14);
    /// A tuple of results.
    pub const T: Self = Self(15);
    /// A basic block.
    pub const BB: Self = Self(16);

    /// Number of bits in a value of this mode. Zero for the non-data modes.
    pub fn bits(self) -> u32 {
        match self {
            Self::IS8 | Self::IU8 => 8,
            Self::IS16 | Self::IU16 => 16,
            Self::IS32 | Self::IU32 | Self::F32 => 32,
            Self::IS64 | Self::IU64 | Self::F64 => 64,
            Self::P => u32::from(crate::init::params().pointer_bits),
            Self::B => 1,
            _ => 0,
        }
    }

    /// Number of bytes in a value of this mode, rounded up. Zero for the non-data modes.
    pub fn bytes(self) -> u32 {
        (self.bits() + 7) / 8
    }

    /// Is this a signed integer mode?
    pub fn is_signed(self) -> bool {
        matches!(self, Self::IS8 | Self::IS16 | Self::IS32 | Self::IS64)
    }

    /// Is this an integer mode, signed or unsigned?
    pub fn is_int(self) -> bool {
        self.0 >= Self::IS8.0 && self.0 <= Self::IU64.0
    }

    /// Is this a floating point mode?
    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Is this a numeric mode: integer or float?
    pub fn is_num(self) -> bool {
        self.is_int() || self.is_float()
    }

    /// Is this a data mode: one whose values can be stored in registers and memory?
    pub fn is_data(self) -> bool {
        self.is_num() || self == Self::P || self == Self::B
    }

    /// The signed integer mode of the same width, if this is an integer mode.
    pub fn as_signed(self) -> Self {
        if self.0 >= Self::IU8.0 && self.0 <= Self::IU64.0 {
            Self(self.0 - 4)
        } else {
            self
        }
    }

    /// The unsigned integer mode of the same width, if this is an integer mode.
    pub fn as_unsigned(self) -> Self {
        if self.0 >= Self::IS8.0 && self.0 <= Self::IS64.0 {
            Self(self.0 + 4)
        } else {
            self
        }
    }

    /// The integer mode with the given width and signedness, if there is one.
    pub fn int(bits: u32, signed: bool) -> Option<Self> {
        let m = match (bits, signed) {
            (8, true) => Self::IS8,
            (16, true) => Self::IS16,
            (32, true) => Self::IS32,
            (64, true) => Self::IS64,
            (8, false) => Self::IU8,
            (16, false) => Self::IU16,
            (32, false) => Self::IU32,
            (64, false) => Self::IU64,
            _ => return None,
        };
        Some(m)
    }

    fn name(self) -> &'static str {
        match self {
            Self::INVALID => "invalid",
            Self::IS8 => "is8",
            Self::IS16 => "is16",
            Self::IS32 => "is32",
            Self::IS64 => "is64",
            Self::IU8 => "iu8",
            Self::IU16 => "iu16",
            Self::IU32 => "iu32",
            Self::IU64 => "iu64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::P => "p",
            Self::B => "b",
            Self::M => "m",
            Self::X => "x",
            Self::T => "t",
            Self::BB => "bb",
            _ => "?",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries() {
        assert!(Mode::IS32.is_int());
        assert!(Mode::IS32.is_signed());
        assert!(!Mode::IU32.is_signed());
        assert!(Mode::F64.is_float());
        assert!(!Mode::M.is_data());
        assert!(Mode::P.is_data());
        assert_eq!(Mode::IS16.bits(), 16);
        assert_eq!(Mode::IU64.bytes(), 8);
    }

    #[test]
    fn signedness_flips() {
        assert_eq!(Mode::IS32.as_unsigned(), Mode::IU32);
        assert_eq!(Mode::IU8.as_signed(), Mode::IS8);
        assert_eq!(Mode::F32.as_signed(), Mode::F32);
        assert_eq!(Mode::int(32, true), Some(Mode::IS32));
        assert_eq!(Mode::int(12, true), None);
    }

    #[test]
    fn display() {
        assert_eq!(Mode::IS32.to_string(), "is32");
        assert_eq!(Mode::M.to_string(), "m");
    }
}
