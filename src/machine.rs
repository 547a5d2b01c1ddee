use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use crate::decode::{decode, target_address, Flags, Instruction};
use crate::device::{DeviceTable, InputStream, OutputStream};
use crate::error::{LoadError, MachineError, Result};
use crate::loader::{ObjectModule, Program};
use crate::memory::{Memory, MAX_ADDRESS};
use crate::opcode::Opcode;
use crate::registers::{Condition, Register, RegisterFile};
use crate::word::{rotate_left, shift_right, to_signed, wrap, Word};

/// Complete machine state: registers, memory and devices.
#[derive(Debug, Default)]
pub struct Machine {
    registers: RegisterFile,
    memory: Memory,
    devices: DeviceTable,
    halted: bool,
    program: Option<Program>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a machine whose file devices live in `dir`.
    pub fn with_device_dir(dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            devices: DeviceTable::new(dir),
            ..Self::default()
        }
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Allow execution to continue after a halt.
    pub fn reset_halt(&mut self) {
        self.halted = false;
    }

    pub fn pc(&self) -> Word {
        self.registers.pc()
    }

    pub fn register(&self, id: u8) -> Result<Word> {
        self.registers.get_id(id)
    }

    pub fn set_register(&mut self, id: u8, value: Word) -> Result<()> {
        self.registers.set_id(id, value)
    }

    pub fn byte(&self, addr: u32) -> Result<u8> {
        self.memory.byte(addr)
    }

    pub fn set_byte(&mut self, addr: u32, value: u8) -> Result<()> {
        self.memory.set_byte(addr, value)
    }

    pub fn word(&self, addr: u32) -> Result<Word> {
        self.memory.word(addr)
    }

    pub fn set_word(&mut self, addr: u32, value: Word) -> Result<()> {
        self.memory.set_word(addr, value)
    }

    pub fn dump(&self, low: u32, high: u32) -> Result<Vec<u8>> {
        self.memory.dump(low, high)
    }

    pub fn test_device(&mut self, id: u32) -> bool {
        self.devices.test(id)
    }

    pub fn read_device(&mut self, id: u32) -> Result<u8> {
        self.devices.read(id)
    }

    pub fn write_device(&mut self, id: u32, byte: u8) -> Result<()> {
        self.devices.write(id, byte)
    }

    /// Bind device `id` to the given streams instead of its default backing.
    pub fn attach_device(
        &mut self,
        id: u8,
        input: Option<InputStream>,
        output: Option<OutputStream>,
    ) {
        self.devices.attach(id, input, output);
    }

    /// Load an object file at the address its header names and point PC at its entry.
    pub fn load_object(&mut self, path: impl AsRef<Path>) -> std::result::Result<&Program, LoadError> {
        let (name, src) = read_object(path.as_ref())?;
        self.load_str(&name, &src)
    }

    /// Load an object file relocated to `base`.
    pub fn load_object_at(
        &mut self,
        path: impl AsRef<Path>,
        base: u32,
    ) -> std::result::Result<&Program, LoadError> {
        let (name, src) = read_object(path.as_ref())?;
        self.load_str_at(&name, &src, base)
    }

    /// Load an object module from text. Nothing changes unless the whole module loads.
    pub fn load_str(&mut self, name: &str, src: &str) -> std::result::Result<&Program, LoadError> {
        let program = ObjectModule::parse(name, src)?.load(&mut self.memory)?;
        self.enter(program)
    }

    /// Load an object module from text, relocated to `base`.
    pub fn load_str_at(
        &mut self,
        name: &str,
        src: &str,
        base: u32,
    ) -> std::result::Result<&Program, LoadError> {
        let program = ObjectModule::parse(name, src)?.load_at(&mut self.memory, base)?;
        self.enter(program)
    }

    fn enter(&mut self, program: Program) -> std::result::Result<&Program, LoadError> {
        self.registers = RegisterFile::new();
        // Entry is range-checked by the loader
        self.registers
            .set(Register::PC, program.entry)
            .map_err(|_| LoadError::OutOfRange(program.entry))?;
        self.halted = false;
        Ok(&*self.program.insert(program))
    }

    /// Execute one instruction. Any error halts the machine.
    pub fn execute(&mut self) -> Result<()> {
        if self.halted {
            return Err(MachineError::Halted);
        }
        let result = self.step();
        if let Err(error) = &result {
            warn!("Halted at 0x{:06X}: {}", self.registers.pc(), error);
            self.halted = true;
        }
        result
    }

    fn step(&mut self) -> Result<()> {
        let pc = self.registers.pc();
        if pc > MAX_ADDRESS {
            return Err(MachineError::AddressOutOfRange(pc));
        }

        let instruction = match decode(self.memory.peek::<4>(pc)) {
            Ok(instruction) => instruction,
            Err(error) => {
                // Only the opcode byte was consumed
                self.registers.set(Register::PC, pc + 1)?;
                return Err(error);
            }
        };
        let next = pc + instruction.length();
        if next - 1 > MAX_ADDRESS {
            return Err(MachineError::AddressOutOfRange(next - 1));
        }
        self.registers.set(Register::PC, next)?;
        debug!("0x{:06X}: {}", pc, instruction);

        match instruction {
            Instruction::Format1 { opcode } => Err(MachineError::UnimplementedOpcode(opcode)),
            Instruction::Format2 { opcode, r1, r2 } => self.exec_format2(opcode, r1, r2),
            Instruction::Format34 {
                opcode,
                flags,
                field,
            } => self.exec_format34(pc, opcode, flags, field),
        }
    }

    fn reg(&self, id: u8) -> Result<Word> {
        self.registers.get_id(id)
    }

    fn set_reg(&mut self, register: Register, value: Word) -> Result<()> {
        self.registers.set(register, value)
    }

    fn compare(&mut self, left: Word, right: Word) {
        let condition = Condition::from(to_signed(left).cmp(&to_signed(right)));
        self.registers.set_condition(condition);
    }

    fn divide(dividend: Word, divisor: Word) -> Result<Word> {
        match to_signed(divisor) {
            0 => Err(MachineError::DivisionByZero),
            divisor => Ok(wrap((to_signed(dividend) / divisor) as i64)),
        }
    }

    fn exec_format2(&mut self, opcode: Opcode, r1: u8, r2: u8) -> Result<()> {
        use Opcode::*;
        let register = |id: u8| Register::try_from(id);
        match opcode {
            ADDR => self.set_reg(register(r2)?, wrap(self.reg(r2)? as i64 + self.reg(r1)? as i64)),
            SUBR => self.set_reg(register(r2)?, wrap(self.reg(r2)? as i64 - self.reg(r1)? as i64)),
            MULR => self.set_reg(register(r2)?, wrap(self.reg(r2)? as i64 * self.reg(r1)? as i64)),
            DIVR => self.set_reg(register(r2)?, Self::divide(self.reg(r2)?, self.reg(r1)?)?),
            COMPR => {
                let (left, right) = (self.reg(r1)?, self.reg(r2)?);
                self.compare(left, right);
                Ok(())
            }
            RMO => self.set_reg(register(r2)?, self.reg(r1)?),
            CLEAR => self.set_reg(register(r1)?, 0),
            SHIFTL => self.set_reg(register(r1)?, rotate_left(self.reg(r1)?, r2 as u32 + 1)),
            SHIFTR => self.set_reg(register(r1)?, shift_right(self.reg(r1)?, r2 as u32 + 1)),
            TIXR => {
                let limit = register(r1)?;
                let x = wrap(self.registers.get(Register::X) as i64 + 1);
                self.set_reg(Register::X, x)?;
                self.compare(x, self.registers.get(limit));
                Ok(())
            }
            _ => Err(MachineError::UnimplementedOpcode(opcode)),
        }
    }

    fn exec_format34(&mut self, pc: Word, opcode: Opcode, flags: Flags, field: u32) -> Result<()> {
        if opcode.is_unimplemented() {
            return Err(MachineError::UnimplementedOpcode(opcode));
        }
        let target = target_address(
            flags,
            field,
            self.registers.pc(),
            self.registers.get(Register::B),
            self.registers.get(Register::X),
        )?;

        if opcode == Opcode::RSUB {
            let link = self.registers.get(Register::L);
            return self.set_reg(Register::PC, link);
        }

        // Immediate values are words; every other mode names a memory address
        let target = if flags.is_immediate() {
            wrap(target)
        } else {
            in_memory(target)?
        };
        debug!("Target address: 0x{:06X}", target);

        if opcode.takes_address() {
            let address = if flags.is_indirect() {
                self.memory.word(target)?
            } else {
                target
            };
            return self.exec_with_address(pc, opcode, flags, address);
        }

        let operand = if flags.is_immediate() {
            target
        } else if flags.is_indirect() {
            self.memory.word(self.memory.word(target)?)?
        } else {
            self.memory.word(target)?
        };
        debug!("Operand: 0x{:06X}", operand);
        self.exec_with_operand(opcode, operand)
    }

    /// Jumps, stores and byte loads.
    fn exec_with_address(&mut self, pc: Word, opcode: Opcode, flags: Flags, address: Word) -> Result<()> {
        use Opcode::*;
        let condition = self.registers.condition();
        match opcode {
            J => self.jump(pc, address),
            JEQ if condition == Condition::EQ => self.jump(pc, address),
            JGT if condition == Condition::GT => self.jump(pc, address),
            JLT if condition == Condition::LT => self.jump(pc, address),
            JEQ | JGT | JLT => Ok(()),
            JSUB => {
                self.set_reg(Register::L, self.registers.pc())?;
                self.jump(pc, address)
            }
            LDCH => {
                let byte = if flags.is_immediate() {
                    (address & 0xFF) as u8
                } else {
                    self.memory.byte(address)?
                };
                self.registers.set_a_low(byte);
                Ok(())
            }
            STCH => self.memory.set_byte(address, self.registers.a_low()),
            STA => self.store(address, Register::A),
            STB => self.store(address, Register::B),
            STF => self.store(address, Register::F),
            STL => self.store(address, Register::L),
            STS => self.store(address, Register::S),
            STSW => self.store(address, Register::SW),
            STT => self.store(address, Register::T),
            STX => self.store(address, Register::X),
            _ => Err(MachineError::UnimplementedOpcode(opcode)),
        }
    }

    fn exec_with_operand(&mut self, opcode: Opcode, operand: Word) -> Result<()> {
        use Opcode::*;
        let a = self.registers.get(Register::A);
        match opcode {
            ADD => self.set_reg(Register::A, wrap(a as i64 + operand as i64)),
            SUB => self.set_reg(Register::A, wrap(a as i64 - operand as i64)),
            MUL => self.set_reg(Register::A, wrap(a as i64 * operand as i64)),
            DIV => self.set_reg(Register::A, Self::divide(a, operand)?),
            AND => self.set_reg(Register::A, a & operand),
            OR => self.set_reg(Register::A, a | operand),
            COMP => {
                self.compare(a, operand);
                Ok(())
            }
            LDA => self.set_reg(Register::A, operand),
            LDB => self.set_reg(Register::B, operand),
            LDF => self.set_reg(Register::F, operand),
            LDL => self.set_reg(Register::L, operand),
            LDS => self.set_reg(Register::S, operand),
            LDT => self.set_reg(Register::T, operand),
            LDX => self.set_reg(Register::X, operand),
            TIX => {
                let x = wrap(self.registers.get(Register::X) as i64 + 1);
                self.set_reg(Register::X, x)?;
                self.compare(x, operand);
                Ok(())
            }
            RD => {
                let byte = self.devices.read(operand & 0xFF)?;
                self.registers.set_a_low(byte);
                Ok(())
            }
            WD => self.devices.write(operand & 0xFF, self.registers.a_low()),
            TD => {
                let condition = if self.devices.test(operand & 0xFF) {
                    Condition::LT
                } else {
                    Condition::EQ
                };
                self.registers.set_condition(condition);
                Ok(())
            }
            _ => Err(MachineError::UnimplementedOpcode(opcode)),
        }
    }

    fn store(&mut self, address: Word, register: Register) -> Result<()> {
        self.memory.set_word(address, self.registers.get(register))
    }

    /// Jumping to the jump's own address is the conventional halt.
    fn jump(&mut self, pc: Word, address: Word) -> Result<()> {
        self.set_reg(Register::PC, address)?;
        if address == pc {
            info!("Halted at 0x{:06X}", pc);
            self.halted = true;
        }
        Ok(())
    }
}

fn read_object(path: &Path) -> std::result::Result<(String, String), LoadError> {
    let src = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((path.display().to_string(), src))
}

fn in_memory(target: i64) -> Result<u32> {
    u32::try_from(target)
        .ok()
        .filter(|address| *address <= MAX_ADDRESS)
        .ok_or(MachineError::AddressOutOfRange(target as u32))
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Write};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Machine with `code` placed at `origin` and PC pointing at it.
    fn machine_with(origin: u32, code: &[u8]) -> Machine {
        let mut machine = Machine::new();
        for (i, byte) in code.iter().enumerate() {
            machine.set_byte(origin + i as u32, *byte).unwrap();
        }
        machine.set_register(Register::PC.id(), origin).unwrap();
        machine
    }

    fn get(machine: &Machine, register: Register) -> Word {
        machine.registers().get(register)
    }

    #[test]
    fn immediate_load_then_add() {
        let mut machine = machine_with(0, &[0x01, 0x00, 0x05, 0x19, 0x00, 0x03]);
        machine.execute().unwrap();
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 8);
        assert_eq!(machine.pc(), 6);
    }

    #[test]
    fn read_device_into_low_byte() {
        // RD #1
        let mut machine = machine_with(0, &[0xD9, 0x00, 0x01]);
        machine.set_register(Register::A.id(), 0x12_3400).unwrap();
        machine.attach_device(1, Some(Box::new(Cursor::new(vec![0x41]))), None);
        machine.execute().unwrap();
        assert_eq!(machine.registers().a_low(), 0x41);
        assert_eq!(get(&machine, Register::A), 0x12_3441);
    }

    #[test]
    fn write_and_test_device() {
        // LDCH #0x4B, WD #5, TD #5, TD #6
        let code = [0x51, 0x00, 0x4B, 0xDD, 0x00, 0x05, 0xE1, 0x00, 0x05, 0xE1, 0x00, 0x06];
        let mut machine = machine_with(0, &code);
        let out = SharedBuffer::default();
        machine.attach_device(5, None, Some(Box::new(out.clone())));
        machine.attach_device(6, None, None);
        machine.set_register(Register::SW.id(), Condition::GT.code()).unwrap();

        machine.execute().unwrap();
        machine.execute().unwrap();
        assert_eq!(*out.0.lock().unwrap(), vec![0x4B]);
        machine.execute().unwrap();
        assert_eq!(machine.registers().condition(), Condition::LT);
        machine.execute().unwrap();
        assert_eq!(machine.registers().condition(), Condition::EQ);
    }

    #[test]
    fn unknown_opcode_halts() {
        let mut machine = machine_with(0x100, &[0xFF]);
        assert!(matches!(machine.execute(), Err(MachineError::UnknownOpcode(0xFF))));
        assert!(machine.halted());
        assert_eq!(machine.pc(), 0x101);
        assert!(matches!(machine.execute(), Err(MachineError::Halted)));
    }

    #[test]
    fn base_and_pc_relative_together() {
        let mut machine = machine_with(0, &[0x03, 0x60, 0x00]);
        assert!(matches!(machine.execute(), Err(MachineError::BadAddressingMode)));
        assert_eq!(machine.pc(), 3);
        assert!(machine.halted());
    }

    #[test]
    fn indexed_immediate_is_rejected() {
        let mut machine = machine_with(0, &[0x01, 0x80, 0x05]);
        assert!(matches!(machine.execute(), Err(MachineError::InvalidAddressing)));
    }

    #[test]
    fn pc_relative_displacements() {
        // J with displacement 0x7FF: target = 3 + 2047
        let mut machine = machine_with(0, &[0x3F, 0x27, 0xFF]);
        machine.execute().unwrap();
        assert_eq!(machine.pc(), 0x802);

        // J with displacement 0x800: target = 0x1003 - 2048
        let mut machine = machine_with(0x1000, &[0x3F, 0x28, 0x00]);
        machine.execute().unwrap();
        assert_eq!(machine.pc(), 0x803);
    }

    #[test]
    fn base_relative_load() {
        // LDA 0x010 (base)
        let mut machine = machine_with(0, &[0x03, 0x40, 0x10]);
        machine.set_register(Register::B.id(), 0x2000).unwrap();
        machine.set_word(0x2010, 0xAB_CDEF).unwrap();
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 0xAB_CDEF);
    }

    #[test]
    fn targets_past_memory_fail() {
        // LDA 0x100,X with X = 0xFFFF00
        let mut machine = machine_with(0, &[0x03, 0x81, 0x00]);
        machine.set_register(Register::X.id(), 0xFF_FF00).unwrap();
        assert!(matches!(
            machine.execute(),
            Err(MachineError::AddressOutOfRange(0x100_0000))
        ));
        assert!(machine.halted());
        assert_eq!(get(&machine, Register::A), 0);

        // +STA 0xFFFFF (base) with B = 0xF00002
        let code = [0x0F, 0x5F, 0xFF, 0xFF];
        let mut machine = machine_with(0, &code);
        machine.set_register(Register::A.id(), 0xAB_CDEF).unwrap();
        machine.set_register(Register::B.id(), 0xF0_0002).unwrap();
        assert!(matches!(
            machine.execute(),
            Err(MachineError::AddressOutOfRange(0x100_0001))
        ));
        assert_eq!(machine.dump(0, 3).unwrap(), code.to_vec());

        // LDA with a PC-relative displacement below address 0
        let mut machine = machine_with(0, &[0x03, 0x2F, 0xF0]);
        assert!(matches!(
            machine.execute(),
            Err(MachineError::AddressOutOfRange(_))
        ));
    }

    #[test]
    fn immediate_targets_wrap() {
        // LDA #0xFFF (base) with B = 0xFFFFFF
        let mut machine = machine_with(0, &[0x01, 0x4F, 0xFF]);
        machine.set_register(Register::B.id(), 0xFF_FFFF).unwrap();
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 0xFFE);
    }

    #[test]
    fn addressing_modes() {
        // LDA @0x100
        let mut machine = machine_with(0, &[0x02, 0x01, 0x00]);
        machine.set_word(0x100, 0x200).unwrap();
        machine.set_word(0x200, 0x12_3456).unwrap();
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 0x12_3456);

        // LDA 0x100,X
        let mut machine = machine_with(0, &[0x03, 0x81, 0x00]);
        machine.set_register(Register::X.id(), 3).unwrap();
        machine.set_word(0x103, 0x00_0042).unwrap();
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 0x42);

        // SIC: LDA 0x100
        let mut machine = machine_with(0, &[0x00, 0x01, 0x00]);
        machine.set_word(0x100, 0x00_0007).unwrap();
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 7);

        // +LDA #0x12345
        let mut machine = machine_with(0, &[0x01, 0x11, 0x23, 0x45]);
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 0x1_2345);
        assert_eq!(machine.pc(), 4);
    }

    #[test]
    fn stores() {
        // STA 0x100, STCH 0x200, STSW 0x300, STX @0x400
        let code = [
            0x0F, 0x01, 0x00, 0x57, 0x02, 0x00, 0xEB, 0x03, 0x00, 0x12, 0x04, 0x00,
        ];
        let mut machine = machine_with(0, &code);
        machine.set_register(Register::A.id(), 0x11_2233).unwrap();
        machine.set_register(Register::SW.id(), Condition::GT.code()).unwrap();
        machine.set_register(Register::X.id(), 0x00_0009).unwrap();
        machine.set_word(0x400, 0x500).unwrap();
        for _ in 0..4 {
            machine.execute().unwrap();
        }
        assert_eq!(machine.word(0x100).unwrap(), 0x11_2233);
        assert_eq!(machine.dump(0x200, 0x201).unwrap(), vec![0x33, 0x00]);
        assert_eq!(machine.word(0x300).unwrap(), 0x80);
        assert_eq!(machine.word(0x500).unwrap(), 9);
    }

    #[test]
    fn load_character() {
        // LDCH 0x100
        let mut machine = machine_with(0, &[0x53, 0x01, 0x00]);
        machine.set_register(Register::A.id(), 0xFF_FF00).unwrap();
        machine.set_byte(0x100, 0x5A).unwrap();
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 0xFF_FF5A);
    }

    #[test]
    fn subroutine_call_and_return() {
        // JSUB 0x10 (pc), at 0x10: RSUB
        let mut code = vec![0x4B, 0x20, 0x0D];
        code.resize(0x10, 0);
        code.extend([0x4F, 0x00, 0x00]);
        let mut machine = machine_with(0, &code);
        machine.execute().unwrap();
        assert_eq!(machine.pc(), 0x10);
        assert_eq!(get(&machine, Register::L), 3);
        machine.execute().unwrap();
        assert_eq!(machine.pc(), 3);
    }

    #[test]
    fn conditional_jumps() {
        // COMP #5, JEQ 0x100, JLT 0x200
        let code = [0x29, 0x00, 0x05, 0x33, 0x01, 0x00, 0x3B, 0x02, 0x00];
        let mut machine = machine_with(0, &code);
        machine.set_register(Register::A.id(), 4).unwrap();
        machine.execute().unwrap();
        assert_eq!(machine.registers().condition(), Condition::LT);
        machine.execute().unwrap();
        assert_eq!(machine.pc(), 6);
        machine.execute().unwrap();
        assert_eq!(machine.pc(), 0x200);
    }

    #[test]
    fn jump_to_self_halts() {
        let mut machine = machine_with(0x12, &[0x3F, 0x2F, 0xFD]);
        machine.execute().unwrap();
        assert_eq!(machine.pc(), 0x12);
        assert!(machine.halted());
        assert!(matches!(machine.execute(), Err(MachineError::Halted)));

        machine.reset_halt();
        machine.execute().unwrap();
        assert!(machine.halted());
    }

    #[test]
    fn arithmetic_policy() {
        // SUB #1 from 0 wraps
        let mut machine = machine_with(0, &[0x1D, 0x00, 0x01]);
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 0xFF_FFFF);

        // COMP treats words as signed: -1 < 1
        let mut machine = machine_with(0, &[0x29, 0x00, 0x01]);
        machine.set_register(Register::A.id(), 0xFF_FFFF).unwrap();
        machine.execute().unwrap();
        assert_eq!(machine.registers().condition(), Condition::LT);

        // DIV #2 of -6
        let mut machine = machine_with(0, &[0x25, 0x00, 0x02]);
        machine.set_register(Register::A.id(), 0xFF_FFFA).unwrap();
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 0xFF_FFFD);

        // DIV #0
        let mut machine = machine_with(0, &[0x25, 0x00, 0x00]);
        assert!(matches!(machine.execute(), Err(MachineError::DivisionByZero)));
        assert!(machine.halted());
    }

    #[test]
    fn index_loop() {
        // TIX #2 twice
        let mut machine = machine_with(0, &[0x2D, 0x00, 0x02, 0x2D, 0x00, 0x02]);
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::X), 1);
        assert_eq!(machine.registers().condition(), Condition::LT);
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::X), 2);
        assert_eq!(machine.registers().condition(), Condition::EQ);
    }

    #[test]
    fn register_instructions() {
        // ADDR S, T; SUBR A, T; MULR S, A; RMO T, B; COMPR A, B; CLEAR S; SHIFTL T, 4; TIXR T
        let code = [
            0x90, 0x45, 0x94, 0x05, 0x98, 0x40, 0xAC, 0x53, 0xA0, 0x03, 0xB4, 0x40, 0xA4, 0x53,
            0xB8, 0x50,
        ];
        let mut machine = machine_with(0, &code);
        machine.set_register(Register::A.id(), 2).unwrap();
        machine.set_register(Register::S.id(), 3).unwrap();
        machine.set_register(Register::T.id(), 4).unwrap();

        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::T), 7);
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::T), 5);
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 6);
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::B), 5);
        machine.execute().unwrap();
        assert_eq!(machine.registers().condition(), Condition::GT);
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::S), 0);
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::T), 0x50);
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::X), 1);
        assert_eq!(machine.registers().condition(), Condition::LT);
        assert_eq!(machine.pc(), 16);
    }

    #[test]
    fn register_instruction_errors() {
        // ADDR with register 7
        let mut machine = machine_with(0, &[0x90, 0x70]);
        assert!(matches!(machine.execute(), Err(MachineError::InvalidRegister(7))));

        // DIVR A, X with A = 0
        let mut machine = machine_with(0, &[0x9C, 0x01]);
        assert!(matches!(machine.execute(), Err(MachineError::DivisionByZero)));
        assert_eq!(get(&machine, Register::X), 0);
    }

    #[test]
    fn unimplemented_opcodes() {
        for code in [[0xC4, 0, 0], [0xB0, 0, 0], [0x5B, 0x00, 0x00]] {
            let mut machine = machine_with(0, &code);
            assert!(matches!(
                machine.execute(),
                Err(MachineError::UnimplementedOpcode(_))
            ));
        }
    }

    #[test]
    fn load_then_run() {
        let src = "HPROG  00100000000C\nT00100006010005190003\nE001000\n";
        let mut machine = Machine::new();
        machine.load_str("prog.obj", src).unwrap();
        assert_eq!(machine.pc(), 0x1000);
        assert_eq!(machine.dump(0x1000, 0x1005).unwrap(), vec![1, 0, 5, 0x19, 0, 3]);
        machine.execute().unwrap();
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 8);
    }

    #[test]
    fn load_relocated() {
        // +LDA 0x00007, J to itself, data word at 7
        let src = "HPROG  00000000000A\n\
                   T0000000A031000073F2FFD000007\n\
                   M00000105+PROG\n\
                   E000000\n";
        let mut machine = Machine::new();
        let program = machine.load_str_at("prog.obj", src, 0x3000).unwrap();
        assert_eq!((program.start, program.entry), (0x3000, 0x3000));
        assert_eq!(machine.pc(), 0x3000);
        assert_eq!(machine.dump(0x3000, 0x3003).unwrap(), vec![0x03, 0x10, 0x30, 0x07]);
        machine.execute().unwrap();
        assert_eq!(get(&machine, Register::A), 7);
        machine.execute().unwrap();
        assert!(machine.halted());
        assert_eq!(machine.byte(0).unwrap(), 0);
    }

    #[test]
    fn failed_load_keeps_previous_state() {
        let mut machine = machine_with(0x40, &[0x01, 0x00, 0x05]);
        assert!(machine.load_str("bad.obj", "HPROG  000000000001\nT0000000G\nE000000\n").is_err());
        assert_eq!(machine.pc(), 0x40);
        assert!(machine.program().is_none());
    }
}
