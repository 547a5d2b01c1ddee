//! Single-step and continuous execution of a shared [`Machine`].
//!
//! Every access to the machine goes through one mutex, so a continuous run can be interleaved
//! with interactive register, memory and device calls. The worker holds the lock for exactly
//! one instruction at a time.

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::error::{LoadError, Result};
use crate::loader::Program;
use crate::machine::Machine;

/// Default interval between instructions in continuous mode.
pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<Result<()>>,
}

pub struct Driver {
    machine: Arc<Mutex<Machine>>,
    worker: Option<Worker>,
    tick: Duration,
}

impl Driver {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine: Arc::new(Mutex::new(machine)),
            worker: None,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Exclusive access to the machine. Blocks while the worker is mid-instruction.
    pub fn lock(&self) -> MutexGuard<'_, Machine> {
        lock(&self.machine)
    }

    /// Execute one instruction on the caller's thread.
    pub fn step(&self) -> Result<()> {
        self.lock().execute()
    }

    pub fn halted(&self) -> bool {
        self.lock().halted()
    }

    pub fn load_object(&self, path: impl AsRef<Path>) -> std::result::Result<Program, LoadError> {
        self.lock().load_object(path).cloned()
    }

    /// Start continuous execution. Returns `false` if already running.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        // Reap a worker which stopped by itself
        let _ = self.join();

        let (stop, stopped) = mpsc::channel();
        let machine = Arc::clone(&self.machine);
        let tick = self.tick;
        let handle = thread::spawn(move || loop {
            match stopped.recv_timeout(tick) {
                Err(RecvTimeoutError::Timeout) => (),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
            let mut machine = lock(&machine);
            if machine.halted() {
                return Ok(());
            }
            if let Err(err) = machine.execute() {
                error!("Stopped on error: {}", err);
                return Err(err);
            }
            if machine.halted() {
                return Ok(());
            }
        });

        info!("Started with tick {:?}", tick);
        self.worker = Some(Worker { stop, handle });
        true
    }

    /// Stop continuous execution. The instruction in flight, if any, completes first.
    pub fn stop(&mut self) {
        if let Some(worker) = &self.worker {
            // Fails only if the worker already exited
            let _ = worker.stop.send(());
        }
        if self.join().is_some() {
            info!("Stopped");
        }
    }

    /// Block until continuous execution ends by itself, returning the error which ended it.
    pub fn wait(&mut self) -> Result<()> {
        self.join().unwrap_or(Ok(()))
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    fn join(&mut self) -> Option<Result<()>> {
        let worker = self.worker.take()?;
        match worker.handle.join() {
            Ok(result) => Some(result),
            Err(_) => {
                warn!("Execution thread panicked");
                Some(Ok(()))
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}

// Machine state is consistent between instructions, so a poisoned lock is still usable
fn lock(machine: &Mutex<Machine>) -> MutexGuard<'_, Machine> {
    machine.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::error::MachineError;
    use crate::registers::Register;

    /// Counts X up with `TIX #0x10` then spins on `J` to itself.
    const COUNT_THEN_HALT: &str = "HCOUNT 000000000009\n\
                                   T000000092D00103B2FFA3F2FFD\n\
                                   E000000\n";

    fn driver(src: &str) -> Driver {
        let mut machine = Machine::new();
        machine.load_str("count.obj", src).unwrap();
        Driver::new(machine).with_tick(Duration::from_micros(50))
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn single_step() {
        let driver = driver(COUNT_THEN_HALT);
        driver.step().unwrap();
        assert_eq!(driver.lock().registers().get(Register::X), 1);
        assert_eq!(driver.lock().pc(), 3);
        assert!(!driver.is_running());
    }

    #[test]
    fn runs_until_halted() {
        let mut driver = driver(COUNT_THEN_HALT);
        assert!(driver.start());
        assert!(wait_until(Duration::from_secs(10), || driver.halted()));
        driver.wait().unwrap();
        assert!(!driver.is_running());

        let machine = driver.lock();
        assert_eq!(machine.registers().get(Register::X), 0x10);
        assert_eq!(machine.pc(), 6);
    }

    #[test]
    fn stop_is_prompt() {
        // J to 3, then J to 0: never halts
        let mut driver = driver("HLOOP  000000000006\nT000000063F20003F2FFA\nE000000\n")
            .with_tick(Duration::from_secs(60));
        assert!(driver.start());
        assert!(!driver.start());
        assert!(driver.is_running());

        let start = Instant::now();
        driver.stop();
        assert!(start.elapsed() < Duration::from_secs(30));
        assert!(!driver.is_running());
        assert_eq!(driver.lock().pc(), 0);
    }

    #[test]
    fn stops_on_error() {
        let mut driver = driver("HBAD   000000000001\nT00000001FF\nE000000\n");
        driver.start();
        assert!(matches!(driver.wait(), Err(MachineError::UnknownOpcode(0xFF))));
        assert!(driver.halted());
        assert!(!driver.is_running());
    }

    #[test]
    fn loads_object_files() {
        let path = std::env::temp_dir().join(format!("sicxe-driver-{}.obj", std::process::id()));
        std::fs::write(&path, COUNT_THEN_HALT).unwrap();

        let driver = Driver::new(Machine::new());
        let program = driver.load_object(&path).unwrap();
        assert_eq!(program.name, "COUNT");
        assert_eq!(driver.lock().pc(), 0);
        driver.step().unwrap();
        assert_eq!(driver.lock().registers().get(Register::X), 1);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn interleaved_access() {
        let mut driver = driver("HLOOP  000000000006\nT000000063F20003F2FFA\nE000000\n");
        driver.start();
        for addr in 0x100..0x140 {
            driver.lock().set_byte(addr, addr as u8).unwrap();
        }
        driver.stop();
        assert_eq!(driver.lock().byte(0x13F).unwrap(), 0x3F);
        assert!(!driver.halted());
    }
}
