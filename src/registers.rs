use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{MachineError, Result};
use crate::word::{is_word, Word};

/// Architectural register, numbered as in the SIC/XE register-id space.
///
/// Id 7 is reserved and has no register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    A,
    X,
    L,
    B,
    S,
    T,
    F,
    PC,
    SW,
}

impl Register {
    /// Every register, in id order.
    pub const ALL: [Register; 9] = [
        Self::A,
        Self::X,
        Self::L,
        Self::B,
        Self::S,
        Self::T,
        Self::F,
        Self::PC,
        Self::SW,
    ];

    pub fn id(self) -> u8 {
        match self {
            Self::A => 0,
            Self::X => 1,
            Self::L => 2,
            Self::B => 3,
            Self::S => 4,
            Self::T => 5,
            Self::F => 6,
            Self::PC => 8,
            Self::SW => 9,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::X => "X",
            Self::L => "L",
            Self::B => "B",
            Self::S => "S",
            Self::T => "T",
            Self::F => "F",
            Self::PC => "PC",
            Self::SW => "SW",
        }
    }
}

impl TryFrom<u8> for Register {
    type Error = MachineError;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Self::A),
            1 => Ok(Self::X),
            2 => Ok(Self::L),
            3 => Ok(Self::B),
            4 => Ok(Self::S),
            5 => Ok(Self::T),
            6 => Ok(Self::F),
            8 => Ok(Self::PC),
            9 => Ok(Self::SW),
            _ => Err(MachineError::InvalidRegister(id)),
        }
    }
}

impl FromStr for Register {
    type Err = String;

    /// Accepts a register name (any case) or its numeric id.
    fn from_str(string: &str) -> std::result::Result<Self, Self::Err> {
        if let Ok(id) = string.parse::<u8>() {
            return Register::try_from(id).map_err(|error| error.to_string());
        }
        Register::ALL
            .into_iter()
            .find(|register| register.name().eq_ignore_ascii_case(string))
            .ok_or_else(|| format!("not a valid register: {string}"))
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Condition code held in SW.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Condition {
    #[default]
    LT = 0x00,
    EQ = 0x40,
    GT = 0x80,
}

impl Condition {
    pub fn code(self) -> Word {
        self as Word
    }
}

impl From<Ordering> for Condition {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Self::LT,
            Ordering::Equal => Self::EQ,
            Ordering::Greater => Self::GT,
        }
    }
}

impl TryFrom<Word> for Condition {
    type Error = MachineError;

    fn try_from(code: Word) -> Result<Self> {
        match code {
            0x00 => Ok(Self::LT),
            0x40 => Ok(Self::EQ),
            0x80 => Ok(Self::GT),
            _ => Err(MachineError::InvalidCondition(code)),
        }
    }
}

/// The machine's register file. Every register holds a word; SW holds a condition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterFile {
    a: Word,
    x: Word,
    l: Word,
    b: Word,
    s: Word,
    t: Word,
    f: Word,
    pc: Word,
    sw: Condition,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, register: Register) -> Word {
        match register {
            Register::A => self.a,
            Register::X => self.x,
            Register::L => self.l,
            Register::B => self.b,
            Register::S => self.s,
            Register::T => self.t,
            Register::F => self.f,
            Register::PC => self.pc,
            Register::SW => self.sw.code(),
        }
    }

    /// Write a register. Values outside a word, or non-condition values for SW, are rejected
    /// without modifying the register.
    pub fn set(&mut self, register: Register, value: Word) -> Result<()> {
        if !is_word(value) {
            return Err(MachineError::ValueOutOfRange(value));
        }
        let slot = match register {
            Register::A => &mut self.a,
            Register::X => &mut self.x,
            Register::L => &mut self.l,
            Register::B => &mut self.b,
            Register::S => &mut self.s,
            Register::T => &mut self.t,
            Register::F => &mut self.f,
            Register::PC => &mut self.pc,
            Register::SW => {
                self.sw = Condition::try_from(value)?;
                return Ok(());
            }
        };
        *slot = value;
        Ok(())
    }

    /// Read a register by raw id.
    pub fn get_id(&self, id: u8) -> Result<Word> {
        Ok(self.get(Register::try_from(id)?))
    }

    /// Write a register by raw id.
    pub fn set_id(&mut self, id: u8, value: Word) -> Result<()> {
        self.set(Register::try_from(id)?, value)
    }

    pub fn pc(&self) -> Word {
        self.pc
    }

    pub fn condition(&self) -> Condition {
        self.sw
    }

    pub fn set_condition(&mut self, condition: Condition) {
        self.sw = condition;
    }

    /// Low byte of A, as used by the byte and device instructions.
    pub fn a_low(&self) -> u8 {
        (self.a & 0xFF) as u8
    }

    /// Replace the low byte of A, leaving its upper two bytes untouched.
    pub fn set_a_low(&mut self, value: u8) {
        self.a = (self.a & 0xFF_FF00) | value as Word;
    }
}
