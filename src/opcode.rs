use std::fmt;

macro_rules! opcodes {
    ( $( $name:ident = $code:literal ),* $(,)? ) => {
        /// Every SIC/XE operation, keyed by its opcode byte (n and i bits clear).
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $( $name = $code, )*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$name, )* ];

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $( Opcode::$name => stringify!($name), )*
                }
            }

            fn from_code(code: u8) -> Option<Opcode> {
                match code {
                    $( $code => Some(Opcode::$name), )*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    // Format 1
    FIX = 0xC4,
    FLOAT = 0xC0,
    HIO = 0xF4,
    NORM = 0xC8,
    SIO = 0xF0,
    TIO = 0xF8,
    // Format 2
    ADDR = 0x90,
    CLEAR = 0xB4,
    COMPR = 0xA0,
    DIVR = 0x9C,
    MULR = 0x98,
    RMO = 0xAC,
    SHIFTL = 0xA4,
    SHIFTR = 0xA8,
    SUBR = 0x94,
    SVC = 0xB0,
    TIXR = 0xB8,
    // SIC, format 3 and format 4
    ADD = 0x18,
    ADDF = 0x58,
    AND = 0x40,
    COMP = 0x28,
    COMPF = 0x88,
    DIV = 0x24,
    DIVF = 0x64,
    J = 0x3C,
    JEQ = 0x30,
    JGT = 0x34,
    JLT = 0x38,
    JSUB = 0x48,
    LDA = 0x00,
    LDB = 0x68,
    LDCH = 0x50,
    LDF = 0x70,
    LDL = 0x08,
    LDS = 0x6C,
    LDT = 0x74,
    LDX = 0x04,
    LPS = 0xD0,
    MUL = 0x20,
    MULF = 0x60,
    OR = 0x44,
    RD = 0xD8,
    RSUB = 0x4C,
    SSK = 0xEC,
    STA = 0x0C,
    STB = 0x78,
    STCH = 0x54,
    STF = 0x80,
    STI = 0xD4,
    STL = 0x14,
    STS = 0x7C,
    STSW = 0xE8,
    STT = 0x84,
    STX = 0x10,
    SUB = 0x1C,
    SUBF = 0x5C,
    TD = 0xE0,
    TIX = 0x2C,
    WD = 0xDC,
}

/// Instruction encoding of an opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    One,
    Two,
    /// SIC, format 3 or format 4; told apart by the n, i and e flags.
    ThreeFour,
}

impl Opcode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn format(self) -> Format {
        use Opcode::*;
        match self {
            FIX | FLOAT | HIO | NORM | SIO | TIO => Format::One,
            ADDR | CLEAR | COMPR | DIVR | MULR | RMO | SHIFTL | SHIFTR | SUBR | SVC | TIXR => {
                Format::Two
            }
            _ => Format::ThreeFour,
        }
    }

    /// Look up a format 1 opcode by its full byte.
    pub fn format1(byte: u8) -> Option<Opcode> {
        Self::from_code(byte).filter(|op| op.format() == Format::One)
    }

    /// Look up a format 2 opcode by its full byte.
    pub fn format2(byte: u8) -> Option<Opcode> {
        Self::from_code(byte).filter(|op| op.format() == Format::Two)
    }

    /// Look up a SIC/format 3/format 4 opcode, ignoring the n and i bits.
    pub fn format34(byte: u8) -> Option<Opcode> {
        Self::from_code(byte & 0xFC).filter(|op| op.format() == Format::ThreeFour)
    }

    /// Operations this machine defines no behavior for.
    pub fn is_unimplemented(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            FIX | FLOAT
                | HIO
                | NORM
                | SIO
                | TIO
                | SVC
                | ADDF
                | COMPF
                | DIVF
                | MULF
                | SUBF
                | LPS
                | SSK
                | STI
        )
    }

    /// Operations which use the effective address rather than the value stored there.
    pub fn takes_address(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            J | JEQ
                | JGT
                | JLT
                | JSUB
                | LDCH
                | STA
                | STB
                | STCH
                | STF
                | STL
                | STS
                | STSW
                | STT
                | STX
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}
