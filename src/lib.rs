// Machine state
pub mod word;
pub mod registers;
pub use registers::{Condition, Register, RegisterFile};
pub mod memory;
pub use memory::Memory;
pub mod device;
pub use device::DeviceTable;

// Loading
pub mod loader;
pub use loader::{ObjectModule, Program};

// Execution
pub mod opcode;
pub use opcode::Opcode;
pub mod decode;
pub use decode::Instruction;
pub mod machine;
pub use machine::Machine;
pub mod driver;
pub use driver::Driver;

// Interaction
#[macro_use]
pub mod output;
pub mod repl;
pub use repl::Repl;

pub mod error;
pub use error::{LoadError, MachineError};

pub mod env;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 2;
