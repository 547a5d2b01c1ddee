//! Instruction decoding.
//!
//! Decoding is a pure function of the bytes at PC. The formats are attempted in order: format 1
//! by the full opcode byte, then format 2, then SIC/format 3/format 4 by the upper six bits.

use std::fmt;

use crate::error::{MachineError, Result};
use crate::opcode::Opcode;
use crate::registers::Register;
use crate::word::{s_ext, Word};

/// Addressing flags of a SIC/format 3/format 4 instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    /// Indirect.
    pub n: bool,
    /// Immediate.
    pub i: bool,
    /// Indexed.
    pub x: bool,
    /// Base-relative.
    pub b: bool,
    /// PC-relative.
    pub p: bool,
    /// Extended (format 4).
    pub e: bool,
}

impl Flags {
    /// Neither n nor i: the legacy SIC encoding with a 15-bit address.
    pub fn is_sic(&self) -> bool {
        !self.n && !self.i
    }

    pub fn is_simple(&self) -> bool {
        self.n == self.i
    }

    pub fn is_immediate(&self) -> bool {
        !self.n && self.i
    }

    pub fn is_indirect(&self) -> bool {
        self.n && !self.i
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instruction {
    Format1 {
        opcode: Opcode,
    },
    Format2 {
        opcode: Opcode,
        r1: u8,
        r2: u8,
    },
    /// SIC, format 3 or format 4. `field` holds the raw address or displacement bits.
    Format34 {
        opcode: Opcode,
        flags: Flags,
        field: u32,
    },
}

impl Instruction {
    /// Length in bytes.
    pub fn length(&self) -> u32 {
        match self {
            Self::Format1 { .. } => 1,
            Self::Format2 { .. } => 2,
            Self::Format34 { flags, .. } if flags.e && !flags.is_sic() => 4,
            Self::Format34 { .. } => 3,
        }
    }
}

/// Decode the instruction starting at `bytes[0]`.
pub fn decode(bytes: [u8; 4]) -> Result<Instruction> {
    decode_format1(bytes)
        .or_else(|| decode_format2(bytes))
        .or_else(|| decode_format34(bytes))
        .ok_or(MachineError::UnknownOpcode(bytes[0]))
}

fn decode_format1(bytes: [u8; 4]) -> Option<Instruction> {
    Opcode::format1(bytes[0]).map(|opcode| Instruction::Format1 { opcode })
}

fn decode_format2(bytes: [u8; 4]) -> Option<Instruction> {
    Opcode::format2(bytes[0]).map(|opcode| Instruction::Format2 {
        opcode,
        r1: bytes[1] >> 4,
        r2: bytes[1] & 0x0F,
    })
}

fn decode_format34(bytes: [u8; 4]) -> Option<Instruction> {
    let opcode = Opcode::format34(bytes[0])?;
    let [_, xbpe, b2, b3] = bytes;
    let mut flags = Flags {
        n: bytes[0] & 0x02 != 0,
        i: bytes[0] & 0x01 != 0,
        x: xbpe & 0x80 != 0,
        ..Flags::default()
    };

    let field = if flags.is_sic() {
        // b, p and e are address bits here
        ((xbpe as u32 & 0x7F) << 8) | b2 as u32
    } else {
        flags.b = xbpe & 0x40 != 0;
        flags.p = xbpe & 0x20 != 0;
        flags.e = xbpe & 0x10 != 0;
        if flags.e {
            ((xbpe as u32 & 0x0F) << 16) | ((b2 as u32) << 8) | b3 as u32
        } else {
            ((xbpe as u32 & 0x0F) << 8) | b2 as u32
        }
    };

    Some(Instruction::Format34 {
        opcode,
        flags,
        field,
    })
}

/// Compute the target address of a SIC/format 3/format 4 instruction.
///
/// `pc` must already point past the instruction. The result is not reduced, so a sum past the
/// end of memory or below zero stays visible to the caller.
pub fn target_address(flags: Flags, field: u32, pc: Word, base: Word, index: Word) -> Result<i64> {
    let mut target = field as i64;

    if !flags.is_sic() {
        match (flags.b, flags.p) {
            (true, true) => return Err(MachineError::BadAddressingMode),
            (true, false) => target += base as i64,
            (false, true) if flags.e => target += pc as i64,
            (false, true) => target = s_ext(field, 12) as i64 + pc as i64,
            (false, false) => (),
        }
    }

    if flags.x {
        if !flags.is_simple() {
            return Err(MachineError::InvalidAddressing);
        }
        target += index as i64;
    }

    Ok(target)
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Format1 { opcode } => write!(f, "{opcode}"),
            Self::Format2 { opcode, r1, r2 } => {
                let name = |id: u8| {
                    Register::try_from(id)
                        .map(|register| register.to_string())
                        .unwrap_or_else(|_| id.to_string())
                };
                match opcode {
                    Opcode::CLEAR | Opcode::TIXR => write!(f, "{opcode} {}", name(r1)),
                    Opcode::SHIFTL | Opcode::SHIFTR => {
                        write!(f, "{opcode} {}, {}", name(r1), r2 as u32 + 1)
                    }
                    Opcode::SVC => write!(f, "{opcode} {r1}"),
                    _ => write!(f, "{opcode} {}, {}", name(r1), name(r2)),
                }
            }
            Self::Format34 {
                opcode,
                flags,
                field,
            } => {
                if flags.e && !flags.is_sic() {
                    write!(f, "+")?;
                }
                write!(f, "{opcode}")?;
                if opcode == Opcode::RSUB {
                    return Ok(());
                }
                let prefix = match (flags.n, flags.i) {
                    (true, false) => "@",
                    (false, true) => "#",
                    _ => "",
                };
                let mode = match (flags.b, flags.p) {
                    (true, false) => " (base)",
                    (false, true) => " (pc)",
                    _ => "",
                };
                write!(f, " {prefix}0x{field:X}")?;
                if flags.x {
                    write!(f, ",X")?;
                }
                write!(f, "{mode}")
            }
        }
    }
}
