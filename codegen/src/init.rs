//! Library initialization and machine-wide parameters.
//!
//! Hosts call [`init`] once before building graphs. The parameters describe properties of the
//! compilation target that are not specific to one ISA: byte order, pointer size, the semantics
//! of shift amounts and float-to-int conversion, and tuning knobs for arithmetic strength
//! reduction. Targets and the constant folder read them through [`params`].

use std::sync::OnceLock;
use target_lexicon::Endianness;

/// How a float-to-int conversion behaves when the float value is out of range for the
/// destination mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatIntOverflow {
    /// The result is the minimum or maximum value of the destination mode.
    Saturate,
    /// The result is undefined; the folder refuses to fold such conversions.
    Undefined,
}

/// Machine-wide parameters, enumerated by the host at initialization time.
#[derive(Clone, Debug)]
pub struct InitParams {
    /// Byte order of the compilation target.
    pub byte_order: Endianness,

    /// Size of a pointer in bits.
    pub pointer_bits: u8,

    /// Whether position-independent code is requested.
    pub pic: bool,

    /// Whether the target supports unaligned memory accesses.
    pub unaligned_access: bool,

    /// If non-zero, shift amounts are taken modulo this value, which must be a power of two.
    /// Zero means shift amounts beyond the mode width produce zero (or all-ones for arithmetic
    /// right shifts of negative values).
    pub modulo_shift: u32,

    /// Maximum number of shift+add steps a multiplication by constant may be decomposed into.
    pub max_mul_shifts: u32,

    /// Highest shift amount considered cheap on the target.
    pub highest_shift: u32,

    /// Whether high-word multiplication (`mulh`) may be used for division by constant.
    pub allow_mulh: bool,

    /// Overflow semantics for float-to-int conversion.
    pub float_int_overflow: FloatIntOverflow,

    /// Natural machine word size in bits.
    pub machine_size: u8,

    /// Alignment of parameters passed on the stack, in bytes.
    pub stack_param_align: u8,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            byte_order: Endianness::Little,
            pointer_bits: 64,
            pic: false,
            unaligned_access: false,
            modulo_shift: 32,
            max_mul_shifts: 4,
            highest_shift: 31,
            allow_mulh: true,
            float_int_overflow: FloatIntOverflow::Saturate,
            machine_size: 64,
            stack_param_align: 8,
        }
    }
}

static PARAMS: OnceLock<InitParams> = OnceLock::new();

/// Initialize the library with machine-wide parameters.
///
/// May be called at most once; later calls are ignored so that independent users in one process
/// don't fight over the parameters.
pub fn init(params: InitParams) {
    let _ = PARAMS.set(params);
}

/// Get the machine-wide parameters. Returns defaults if [`init`] was never called.
pub fn params() -> &'static InitParams {
    PARAMS.get_or_init(InitParams::default)
}
