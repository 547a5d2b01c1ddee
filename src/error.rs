use std::path::PathBuf;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::opcode::Opcode;
use crate::word::Word;

pub type Result<T, E = MachineError> = std::result::Result<T, E>;

/// Failure of a register, memory, device or execution operation.
#[derive(Debug, Error, Diagnostic)]
pub enum MachineError {
    #[error("not a valid register: {0}")]
    #[diagnostic(
        code(machine::register),
        help("valid register ids are 0-6 (A, X, L, B, S, T, F), 8 (PC) and 9 (SW)")
    )]
    InvalidRegister(u8),

    #[error("address 0x{0:06X} is outside of memory")]
    #[diagnostic(code(machine::address))]
    AddressOutOfRange(u32),

    #[error("value 0x{0:X} does not fit in a word")]
    #[diagnostic(code(machine::value), help("words range from 0x000000 to 0xFFFFFF"))]
    ValueOutOfRange(u32),

    #[error("0x{0:02X} is not a condition code")]
    #[diagnostic(code(machine::condition), help("SW holds LT (0x00), EQ (0x40) or GT (0x80)"))]
    InvalidCondition(Word),

    #[error("base-relative and pc-relative flags are both set")]
    #[diagnostic(code(exec::addressing_mode))]
    BadAddressingMode,

    #[error("indexed addressing is only allowed with simple addressing")]
    #[diagnostic(code(exec::indexed))]
    InvalidAddressing,

    #[error("opcode {0} is not implemented")]
    #[diagnostic(
        code(exec::unimplemented),
        help("floating point, channel I/O and privileged instructions are not supported")
    )]
    UnimplementedOpcode(Opcode),

    #[error("unknown opcode 0x{0:02X}")]
    #[diagnostic(code(exec::unknown))]
    UnknownOpcode(u8),

    #[error("division by zero")]
    #[diagnostic(code(exec::division))]
    DivisionByZero,

    #[error("not a valid device: {0}")]
    #[diagnostic(code(device::id), help("devices are numbered 0 to 255"))]
    InvalidDevice(u32),

    #[error("device {0:02X} is not available")]
    #[diagnostic(code(device::unavailable))]
    DeviceUnavailable(u8),

    #[error("i/o failure on device {device:02X}")]
    #[diagnostic(code(device::io))]
    Io {
        device: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("machine has halted")]
    #[diagnostic(code(machine::halted), help("load a program to run again"))]
    Halted,
}

/// Failure to load an object module. Loading never leaves a partial program behind.
#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("failed to read object file {}", path.display())]
    #[diagnostic(code(load::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {kind} record on line {line}: {reason}")]
    #[diagnostic(code(load::record))]
    Record {
        kind: &'static str,
        line: usize,
        reason: String,
        #[help]
        help: &'static str,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("object module does not start with a header record")]
    #[diagnostic(code(load::header), help("the first record must be `H`"))]
    MissingHeader,

    #[error("object module has no end record")]
    #[diagnostic(code(load::end), help("the last record must be `E`"))]
    MissingEnd,

    #[error("object module writes outside of memory at 0x{0:06X}")]
    #[diagnostic(code(load::range))]
    OutOfRange(u32),
}
