use std::cell::RefCell;
use std::fmt::Write as _;
use std::str::Chars;

use colored::{ColoredString, Colorize};

use crate::registers::{Register, RegisterFile};
use crate::word::to_signed;

#[macro_export]
macro_rules! dprint {
    ( $cond:expr, $fmt:literal $($tt:tt)* ) => {{
        #[allow(unused_imports)]
        use $crate::output::Condition::*;
        let s = format!(
            $fmt
            $($tt)*
        );
        $crate::output::Output::Debugger($cond).print_str(&s);
    }};
}

#[macro_export]
macro_rules! dprintln {
    ( $cond:expr ) => {{
        #[allow(unused_imports)]
        use $crate::output::Condition::*;
        $crate::output::Output::Debugger($cond).print_str("\n");
    }};
    ( $cond:expr, $fmt:literal $($tt:tt)* ) => {{
        #[allow(unused_imports)]
        use $crate::output::Condition::*;
        let s = format!(
            concat!($fmt, "\n")
            $($tt)*
        );
        $crate::output::Output::Debugger($cond).print_str(&s);
    }};
}

#[derive(Clone, Copy, Debug)]
pub enum Output {
    Debugger(Condition),
}

/// Whether debugger output survives `--minimal`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    Always,
    Sometimes,
}

struct Decolored<'a> {
    chars: Chars<'a>,
}

impl Output {
    thread_local! {
        static IS_MINIMAL: RefCell<bool> = const { RefCell::new(false) };
    }

    pub fn set_minimal(new_value: bool) -> bool {
        Self::IS_MINIMAL.with(|value| value.replace(new_value))
    }
    pub fn is_minimal() -> bool {
        Self::IS_MINIMAL.with(|value| *value.borrow())
    }

    pub fn print_str(&self, string: &str) {
        let Self::Debugger(condition) = self;
        match (Self::is_minimal(), *condition) {
            (false, _) => eprint!("{}", ColoredString::from(string).blue()),
            // Always remove color if `--minimal`
            (true, Condition::Always) => eprint!("{}", decolor(string)),
            (true, Condition::Sometimes) => (),
        }
    }

    pub fn print_registers(&self, registers: &RegisterFile) {
        self.print_str(&registers_table(registers, Self::is_minimal()));
    }

    pub fn print_memory(&self, low: u32, bytes: &[u8]) {
        self.print_str(&memory_table(low, bytes, Self::is_minimal()));
    }
}

/// Every register in hex and signed decimal. SW is shown by condition name.
pub fn registers_table(registers: &RegisterFile, minimal: bool) -> String {
    let mut out = String::new();
    if minimal {
        for register in Register::ALL {
            let _ = writeln!(out, "{} {:06X}", register, registers.get(register));
        }
        return out;
    }

    out.push_str("\x1b[2m┌──────────────────────────┐\x1b[0m\n");
    out.push_str("\x1b[2m│         \x1b[3mhex         int\x1b[0m\x1b[2m │\x1b[0m\n");
    for register in Register::ALL {
        let value = registers.get(register);
        let _ = write!(out, "\x1b[2m│\x1b[0m \x1b[1m{:<3}\x1b[0m", register.name());
        if register == Register::SW {
            let _ = write!(out, "  0x{:06X}  {:>10}", value, format!("{:?}", registers.condition()));
        } else {
            let _ = write!(out, "  0x{:06X}  {:>10}", value, to_signed(value));
        }
        out.push_str(" \x1b[2m│\x1b[0m\n");
    }
    out.push_str("\x1b[2m└──────────────────────────┘\x1b[0m\n");
    out
}

/// Hex dump, sixteen bytes per row, each row labelled with its first address.
pub fn memory_table(low: u32, bytes: &[u8], minimal: bool) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let address = low + row as u32 * 16;
        if minimal {
            let _ = write!(out, "{:06X}", address);
        } else {
            let _ = write!(out, "\x1b[1m{:06X}\x1b[0m", address);
        }
        for byte in chunk {
            let _ = write!(out, " {:02X}", byte);
        }
        if !minimal {
            out.push_str("  ");
            out.extend(chunk.iter().map(|&byte| match byte {
                0x20..=0x7E => byte as char,
                _ => '.',
            }));
        }
        out.push('\n');
    }
    out
}

impl<'a> Decolored<'a> {
    pub fn new(string: &'a str) -> Self {
        Self {
            chars: string.chars(),
        }
    }
}

impl<'a> Iterator for Decolored<'a> {
    type Item = char;
    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ch) = self.chars.next() {
            // Skip everything between '\x1b' and 'm' (inclusive)
            if ch == '\x1b' {
                while self.chars.next().is_some_and(|ch| ch != 'm') {}
                continue;
            }
            return Some(ch);
        }
        None
    }
}

pub fn decolor(string: &str) -> String {
    Decolored::new(string).collect()
}
