//! Interactive command loop over a [`Driver`].
//!
//! Commands are read from a `--command` argument, piped stdin, or an interactive terminal.
//! Each line may hold several commands separated by `;`.

use std::io::{self, BufRead, IsTerminal};
use std::str::FromStr;

use miette::Diagnostic;
use thiserror::Error;

use crate::driver::Driver;
use crate::output::{Condition, Output};
use crate::registers::Register;
use crate::word::Word;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Registers,
    Memory { low: u32, high: u32 },
    /// Execute one instruction.
    Exec,
    /// Execute one instruction, then show registers.
    Step,
    Word { addr: u32 },
    Byte { addr: u32 },
    SetRegister { register: Register, value: Word },
    SetByte { addr: u32, value: u8 },
    SetWord { addr: u32, value: Word },
    /// Start continuous execution.
    Begin,
    /// Stop continuous execution.
    End,
    DeviceTest { id: u32 },
    DeviceRead { id: u32 },
    DeviceWrite { id: u32, value: u8 },
    Halted,
}

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    #[diagnostic(help("type `help` for a list of commands"))]
    Unknown(String),
    #[error("`{command}` expects {name}")]
    MissingArgument {
        command: &'static str,
        name: &'static str,
    },
    #[error("`{command}` takes no more arguments than {expected}")]
    TooManyArguments {
        command: &'static str,
        expected: usize,
    },
    #[error("`{0}` is not an integer")]
    #[diagnostic(help("integers are decimal, or hex with a `0x` prefix"))]
    InvalidInteger(String),
    #[error("{value:#X} does not fit in {max:#X}")]
    TooLarge { value: u32, max: u32 },
    #[error("`{0}` is not a register")]
    InvalidRegister(String),
}

const COMMANDS: &[(&str, &[&str])] = &[
    ("help", &["h", "help"]),
    ("quit", &["q", "quit", "exit"]),
    ("regs", &["r", "regs"]),
    ("mem", &["m", "mem"]),
    ("exec", &["e", "exec"]),
    ("step", &["s", "step"]),
    ("word", &["w", "word"]),
    ("byte", &["b", "byte"]),
    ("setreg", &["sr", "setreg"]),
    ("setbyte", &["sb", "setbyte"]),
    ("setword", &["sw", "setword"]),
    ("begin", &["bt", "begin"]),
    ("end", &["et", "end"]),
    ("dev", &["d", "dev"]),
    ("halted", &["halted"]),
];

pub const HELP: &str = "\
Memory and registers:
    r, regs                 Show registers
    m, mem LOW HIGH         Dump memory from LOW to HIGH inclusive
    w, word ADDR            Show the word at ADDR
    b, byte ADDR            Show the byte at ADDR
    sr, setreg REG VALUE    Set a register, by name or id
    sw, setword ADDR VALUE  Set the word at ADDR
    sb, setbyte ADDR VALUE  Set the byte at ADDR
Execution:
    e, exec                 Execute one instruction
    s, step                 Execute one instruction and show registers
    bt, begin               Start automatic execution
    et, end                 Stop automatic execution
    halted                  Show whether the machine is halted
Devices:
    dev test ID             Test whether a device is ready
    dev read ID             Read a byte from a device
    dev write ID VALUE      Write a byte to a device
Other:
    h, help                 Show this text
    q, quit                 Exit
Integers are decimal, or hex with a `0x` prefix.";

/// Whitespace-separated arguments of a single command.
struct ArgIter<'a> {
    command: &'static str,
    args: std::str::SplitWhitespace<'a>,
    count: usize,
}

impl<'a> ArgIter<'a> {
    fn next_str(&mut self, name: &'static str) -> Result<&'a str, CommandError> {
        self.count += 1;
        self.args.next().ok_or(CommandError::MissingArgument {
            command: self.command,
            name,
        })
    }

    fn next_integer(&mut self, name: &'static str, max: u32) -> Result<u32, CommandError> {
        let value = parse_integer(self.next_str(name)?)?;
        if value > max {
            return Err(CommandError::TooLarge { value, max });
        }
        Ok(value)
    }

    fn next_register(&mut self) -> Result<Register, CommandError> {
        let arg = self.next_str("a register")?;
        arg.parse()
            .map_err(|_| CommandError::InvalidRegister(arg.to_string()))
    }

    fn finish(mut self) -> Result<(), CommandError> {
        match self.args.next() {
            Some(_) => Err(CommandError::TooManyArguments {
                command: self.command,
                expected: self.count,
            }),
            None => Ok(()),
        }
    }
}

/// Parse a decimal or `0x`-prefixed hex integer.
pub fn parse_integer(arg: &str) -> Result<u32, CommandError> {
    let parsed = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => arg.parse(),
    };
    parsed.map_err(|_| CommandError::InvalidInteger(arg.to_string()))
}

impl FromStr for Command {
    type Err = CommandError;

    /// Assumes line is non-empty.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let command = COMMANDS
            .iter()
            .find(|(_, aliases)| aliases.iter().any(|alias| name.eq_ignore_ascii_case(alias)))
            .map(|(command, _)| *command)
            .ok_or_else(|| CommandError::Unknown(name.to_string()))?;

        let mut args = ArgIter {
            command,
            args: words,
            count: 0,
        };
        const ADDRESS: u32 = crate::memory::MAX_ADDRESS;
        const WORD: u32 = crate::word::WORD_MAX;
        const BYTE: u32 = u8::MAX as u32;

        let parsed = match command {
            // Allow trailing arguments
            "help" => return Ok(Self::Help),
            "quit" => Self::Quit,
            "regs" => Self::Registers,
            "exec" => Self::Exec,
            "step" => Self::Step,
            "begin" => Self::Begin,
            "end" => Self::End,
            "halted" => Self::Halted,
            "mem" => Self::Memory {
                low: args.next_integer("a low address", ADDRESS)?,
                high: args.next_integer("a high address", ADDRESS)?,
            },
            "word" => Self::Word {
                addr: args.next_integer("an address", ADDRESS)?,
            },
            "byte" => Self::Byte {
                addr: args.next_integer("an address", ADDRESS)?,
            },
            "setreg" => Self::SetRegister {
                register: args.next_register()?,
                value: args.next_integer("a value", WORD)?,
            },
            "setword" => Self::SetWord {
                addr: args.next_integer("an address", ADDRESS)?,
                value: args.next_integer("a value", WORD)?,
            },
            "setbyte" => Self::SetByte {
                addr: args.next_integer("an address", ADDRESS)?,
                value: args.next_integer("a value", BYTE)? as u8,
            },
            "dev" => {
                let action = args.next_str("`test`, `read` or `write`")?;
                let id = args.next_integer("a device id", BYTE)?;
                match action {
                    "test" | "t" => Self::DeviceTest { id },
                    "read" | "r" => Self::DeviceRead { id },
                    "write" | "w" => Self::DeviceWrite {
                        id,
                        value: args.next_integer("a value", BYTE)? as u8,
                    },
                    _ => return Err(CommandError::Unknown(format!("dev {action}"))),
                }
            }
            _ => return Err(CommandError::Unknown(name.to_string())),
        };
        args.finish()?;
        Ok(parsed)
    }
}

pub trait SourceReader {
    /// `None` indicates EOF
    /// Returned string slice MAY include leading or trailing whitespace
    fn read(&mut self) -> Option<&str>;
}

#[derive(Debug)]
pub enum SourceMode {
    Argument(Argument),
    Stdin(Stdin),
    Terminal(Terminal),
}

// Command-line argument
#[derive(Debug)]
pub struct Argument {
    buffer: String,
    /// Byte index
    cursor: usize,
}

// Stdin which is not attached to a terminal, i.e. piped.
#[derive(Debug)]
pub struct Stdin {
    line: String,
    pending: Argument,
}

// Interactive terminal with line editing
#[derive(Debug)]
pub struct Terminal {
    term: console::Term,
    line: String,
    pending: Argument,
}

impl SourceMode {
    pub fn from(argument: Option<String>) -> Self {
        if let Some(argument) = argument {
            return SourceMode::Argument(Argument::from(argument));
        }
        if io::stdin().is_terminal() {
            return SourceMode::Terminal(Terminal::new());
        }
        SourceMode::Stdin(Stdin::new())
    }
}

impl SourceReader for SourceMode {
    fn read(&mut self) -> Option<&str> {
        let command = match self {
            Self::Argument(argument) => argument.read(),
            Self::Stdin(stdin) => stdin.read(),
            Self::Terminal(terminal) => return terminal.read(),
        };
        // Echo commands which the user did not type
        if let Some(command) = command {
            dprintln!(Sometimes, "\x1b[1m>\x1b[0m {}", command.trim());
        }
        command
    }
}

impl Argument {
    pub fn from(source: String) -> Self {
        Self {
            buffer: source,
            cursor: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.cursor >= self.buffer.len()
    }
}

impl SourceReader for Argument {
    fn read(&mut self) -> Option<&str> {
        // EOF
        if self.is_empty() {
            return None;
        }

        // Take characters until delimiter
        let start = self.cursor;
        let rest = &self.buffer[start..];
        let end = rest
            .find(|ch| ch == '\n' || ch == ';')
            .map_or(self.buffer.len(), |offset| start + offset);
        self.cursor = end + 1; // sizeof('\n' or ';')

        self.buffer.get(start..end)
    }
}

impl Stdin {
    pub fn new() -> Self {
        Self {
            line: String::new(),
            pending: Argument::from(String::new()),
        }
    }
}

impl Default for Stdin {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceReader for Stdin {
    fn read(&mut self) -> Option<&str> {
        if self.pending.is_empty() {
            self.line.clear();
            match io::stdin().lock().read_line(&mut self.line) {
                Ok(0) | Err(_) => return None,
                Ok(_) => self.pending = Argument::from(self.line.trim_end().to_string()),
            }
        }
        // An empty line yields an empty command
        Some(self.pending.read().unwrap_or_default())
    }
}

impl Terminal {
    pub fn new() -> Self {
        Self {
            term: console::Term::stderr(),
            line: String::new(),
            pending: Argument::from(String::new()),
        }
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceReader for Terminal {
    fn read(&mut self) -> Option<&str> {
        if self.pending.is_empty() {
            dprint!(Always, "\x1b[1m>\x1b[0m ");
            self.line = self.term.read_line().ok()?;
            self.pending = Argument::from(self.line.clone());
        }
        Some(self.pending.read().unwrap_or_default())
    }
}

/// Whether the loop should keep reading commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Repl {
    driver: Driver,
    source: SourceMode,
}

impl Repl {
    pub fn new(driver: Driver, source: SourceMode) -> Self {
        Self { driver, source }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Read and run commands until EOF or `quit`, then stop any continuous run.
    pub fn run(&mut self) {
        while let Some(line) = self.source.read() {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let flow = match line.parse::<Command>() {
                Ok(command) => self.execute(command),
                Err(error) => {
                    dprintln!(Always, "Error: {}", error);
                    Flow::Continue
                }
            };
            if flow == Flow::Quit {
                break;
            }
        }
        self.driver.stop();
    }

    pub fn execute(&mut self, command: Command) -> Flow {
        let output = Output::Debugger(Condition::Always);
        let report = |error: &dyn std::fmt::Display| dprintln!(Always, "Error: {}", error);

        match command {
            Command::Help => dprintln!(Always, "{}", HELP),
            Command::Quit => return Flow::Quit,
            Command::Registers => output.print_registers(self.driver.lock().registers()),
            Command::Memory { low, high } => match self.driver.lock().dump(low, high) {
                Ok(bytes) => output.print_memory(low, &bytes),
                Err(error) => report(&error),
            },
            Command::Exec | Command::Step => {
                if self.driver.halted() {
                    dprintln!(Always, "Machine is halted");
                    return Flow::Continue;
                }
                if let Err(error) = self.driver.step() {
                    report(&error);
                }
                if command == Command::Step {
                    output.print_registers(self.driver.lock().registers());
                }
            }
            Command::Word { addr } => match self.driver.lock().word(addr) {
                Ok(word) => dprintln!(Always, "{:06X}", word),
                Err(error) => report(&error),
            },
            Command::Byte { addr } => match self.driver.lock().byte(addr) {
                Ok(byte) => dprintln!(Always, "{:02X}", byte),
                Err(error) => report(&error),
            },
            Command::SetRegister { register, value } => {
                if let Err(error) = self.driver.lock().set_register(register.id(), value) {
                    report(&error);
                }
            }
            Command::SetWord { addr, value } => {
                if let Err(error) = self.driver.lock().set_word(addr, value) {
                    report(&error);
                }
            }
            Command::SetByte { addr, value } => {
                if let Err(error) = self.driver.lock().set_byte(addr, value) {
                    report(&error);
                }
            }
            Command::Begin => {
                if self.driver.halted() {
                    dprintln!(Always, "Machine is halted");
                } else if self.driver.start() {
                    dprintln!(Sometimes, "Started automatic execution");
                } else {
                    dprintln!(Always, "Already running");
                }
            }
            Command::End => {
                if self.driver.is_running() {
                    self.driver.stop();
                    dprintln!(Sometimes, "Stopped automatic execution");
                } else {
                    dprintln!(Always, "Not running");
                }
            }
            Command::DeviceTest { id } => {
                let ready = self.driver.lock().test_device(id);
                dprintln!(Always, "{}", if ready { "ready" } else { "not ready" });
            }
            Command::DeviceRead { id } => match self.driver.lock().read_device(id) {
                Ok(byte) => dprintln!(Always, "{:02X}", byte),
                Err(error) => report(&error),
            },
            Command::DeviceWrite { id, value } => {
                if let Err(error) = self.driver.lock().write_device(id, value) {
                    report(&error);
                }
            }
            Command::Halted => dprintln!(Always, "{}", self.driver.halted()),
        }
        Flow::Continue
    }
}
