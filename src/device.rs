use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use console::Term;
use log::{debug, warn};

use crate::error::{MachineError, Result};

/// Number of addressable devices.
pub const DEVICE_COUNT: usize = 256;

/// Suffix of the file backing a non-standard device.
pub const DEVICE_SUFFIX: &str = "dev";

pub type InputStream = Box<dyn Read + Send>;
pub type OutputStream = Box<dyn Write + Send>;

enum Input {
    /// Process standard input; unbuffered when attached to a terminal. A character read from
    /// the terminal is handed out one UTF-8 byte at a time.
    Stdin { pending: VecDeque<u8> },
    Stream(InputStream),
}

/// A single I/O endpoint. A device with neither stream is unbound.
pub struct Device {
    id: u8,
    name: String,
    input: Option<Input>,
    output: Option<OutputStream>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("readable", &self.input.is_some())
            .field("writable", &self.output.is_some())
            .finish()
    }
}

impl Device {
    /// Bind a device with the fixed rule: 0/1/2 are the standard streams, everything else is
    /// the file `XX.dev` inside `dir`.
    fn open(id: u8, dir: &Path) -> io::Result<Self> {
        let device = match id {
            0 => Self {
                id,
                name: "stdin".into(),
                input: Some(Input::Stdin {
                    pending: VecDeque::new(),
                }),
                output: None,
            },
            1 => Self {
                id,
                name: "stdout".into(),
                input: None,
                output: Some(Box::new(io::stdout())),
            },
            2 => Self {
                id,
                name: "stderr".into(),
                input: None,
                output: Some(Box::new(io::stderr())),
            },
            _ => {
                let path = backing_path(dir, id);
                let output = OpenOptions::new().append(true).create(true).open(&path)?;
                let input = File::open(&path)?;
                Self {
                    id,
                    name: path.display().to_string(),
                    input: Some(Input::Stream(Box::new(input))),
                    output: Some(Box::new(output)),
                }
            }
        };
        debug!("Bound device {:02X} to {}", id, device.name);
        Ok(device)
    }

    pub fn is_bound(&self) -> bool {
        self.input.is_some() || self.output.is_some()
    }

    /// Block until one byte is available.
    fn read(&mut self) -> Result<u8> {
        let id = self.id;
        let io_error = |source| MachineError::Io { device: id, source };
        let byte = match self.input.as_mut() {
            None => return Err(MachineError::DeviceUnavailable(self.id)),
            Some(Input::Stdin { pending }) => read_stdin(pending).map_err(io_error)?,
            Some(Input::Stream(stream)) => {
                let mut buf = [0; 1];
                stream.read_exact(&mut buf).map_err(io_error)?;
                buf[0]
            }
        };
        debug!("Read byte 0x{:02X} from device {}", byte, self.name);
        Ok(byte)
    }

    /// Write one byte and flush it before returning.
    fn write(&mut self, byte: u8) -> Result<()> {
        let Some(output) = self.output.as_mut() else {
            return Err(MachineError::DeviceUnavailable(self.id));
        };
        output
            .write_all(&[byte])
            .and_then(|()| output.flush())
            .map_err(|source| MachineError::Io {
                device: self.id,
                source,
            })?;
        debug!("Wrote byte 0x{:02X} to device {}", byte, self.name);
        Ok(())
    }
}

// Read one byte from stdin or unbuffered terminal
fn read_stdin(pending: &mut VecDeque<u8>) -> io::Result<u8> {
    if io::stdin().is_terminal() {
        next_char_byte(pending, || Term::stdout().read_char())
    } else {
        let mut buf = [0; 1];
        io::stdin().read_exact(&mut buf)?;
        Ok(buf[0])
    }
}

// Serve leftover bytes of the last character before reading another
fn next_char_byte(
    pending: &mut VecDeque<u8>,
    read_char: impl FnOnce() -> io::Result<char>,
) -> io::Result<u8> {
    if pending.is_empty() {
        let mut buf = [0; 4];
        pending.extend(read_char()?.encode_utf8(&mut buf).bytes());
    }
    pending
        .pop_front()
        .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))
}

pub fn backing_path(dir: &Path, id: u8) -> PathBuf {
    dir.join(format!("{id:02X}.{DEVICE_SUFFIX}"))
}

/// The machine's 256 device slots, bound lazily on first use.
pub struct DeviceTable {
    devices: Vec<Option<Device>>,
    dir: PathBuf,
}

impl fmt::Debug for DeviceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceTable")
            .field("dir", &self.dir)
            .field("bound", &self.devices.iter().flatten().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new(".")
    }
}

impl DeviceTable {
    /// Create an empty table whose file devices live in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            devices: (0..DEVICE_COUNT).map(|_| None).collect(),
            dir: dir.into(),
        }
    }

    /// The device for `id`, binding it first if this is its first use.
    pub fn ensure(&mut self, id: u32) -> Result<&mut Device> {
        let id = u8::try_from(id).map_err(|_| MachineError::InvalidDevice(id))?;
        let slot = &mut self.devices[id as usize];
        if slot.is_none() {
            let device = Device::open(id, &self.dir).map_err(|error| {
                warn!("Failed to bind device {:02X}: {}", id, error);
                MachineError::DeviceUnavailable(id)
            })?;
            *slot = Some(device);
        }
        slot.as_mut().ok_or(MachineError::DeviceUnavailable(id))
    }

    /// Bind `id` to caller-provided streams, replacing any existing binding.
    pub fn attach(
        &mut self,
        id: u8,
        input: Option<InputStream>,
        output: Option<OutputStream>,
    ) {
        self.devices[id as usize] = Some(Device {
            id,
            name: format!("attached {id:02X}"),
            input: input.map(Input::Stream),
            output,
        });
    }

    pub fn test(&mut self, id: u32) -> bool {
        self.ensure(id).is_ok_and(|device| device.is_bound())
    }

    pub fn read(&mut self, id: u32) -> Result<u8> {
        self.ensure(id)?.read()
    }

    pub fn write(&mut self, id: u32, byte: u8) -> Result<()> {
        self.ensure(id)?.write(byte)
    }
}
