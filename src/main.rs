use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::LevelFilter;
use miette::{IntoDiagnostic, Result};
use simple_logger::SimpleLogger;

use sicxe::output::Output;
use sicxe::repl::SourceMode;
use sicxe::{Driver, Machine, Repl};

/// sicxe is a virtual machine for SIC/XE object programs.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.obj` file to run
    path: Option<PathBuf>,

    /// Log every executed instruction to stderr
    #[arg(short, long, global = true)]
    debug: bool,

    /// Directory holding device files `XX.dev`
    #[arg(long, global = true, value_name = "DIR")]
    devices: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Load an object file and run it until it halts
    Run {
        /// `.obj` file to run
        name: PathBuf,
        /// Relocate the program to this hexadecimal address
        #[arg(long, value_name = "ADDR", value_parser = parse_address)]
        base: Option<u32>,
        /// Microseconds between instructions
        #[arg(long, value_name = "US")]
        tick_us: Option<u64>,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Load an object file and control the machine interactively
    Debug {
        /// `.obj` file to load
        name: PathBuf,
        /// Relocate the program to this hexadecimal address
        #[arg(long, value_name = "ADDR", value_parser = parse_address)]
        base: Option<u32>,
        /// Read commands from argument
        #[arg(short, long)]
        command: Option<String>,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Check an object file without running it
    Check {
        /// File to check
        name: PathBuf,
        /// Relocate the program to this hexadecimal address
        #[arg(long, value_name = "ADDR", value_parser = parse_address)]
        base: Option<u32>,
    },
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    sicxe::env::init();

    let level = if args.debug || sicxe::env::is_debug() {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    SimpleLogger::new()
        .with_level(level)
        .init()
        .into_diagnostic()?;

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(sicxe::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    let devices = args.devices.unwrap_or_else(sicxe::env::device_dir);

    match args.command {
        Some(Command::Run {
            name,
            base,
            tick_us,
            minimal,
        }) => {
            let tick = tick_us.map_or_else(sicxe::env::tick, Duration::from_micros);
            run(&name, base, &devices, tick, minimal)
        }
        Some(Command::Debug {
            name,
            base,
            command,
            minimal,
        }) => debug(&name, base, &devices, command, minimal),
        Some(Command::Check { name, base }) => {
            file_message(Green, "Checking", &name);
            let mut machine = Machine::with_device_dir(&devices);
            let program = match base {
                Some(base) => machine.load_object_at(&name, base)?,
                None => machine.load_object(&name)?,
            };
            let summary = format!(
                "{} at 0x{:06X}, 0x{:X} bytes",
                program.name, program.start, program.length
            );
            message(Green, "Success", &summary);
            Ok(())
        }
        None => {
            if let Some(path) = args.path {
                run(&path, None, &devices, sicxe::env::tick(), false)
            } else {
                println!("\n~ sicxe v{VERSION} ~");
                println!("{SHORT_INFO}");
                std::process::exit(0);
            }
        }
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    if Output::is_minimal() {
        return;
    }
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    eprintln!("{left:>12} {right}");
}

/// Load `name` into a fresh machine, relocated to `base` if given.
fn load(name: &Path, base: Option<u32>, devices: &Path) -> Result<Machine> {
    file_message(MsgColor::Green, "Loading", name);
    let mut machine = Machine::with_device_dir(devices);
    let program = match base {
        Some(base) => machine.load_object_at(name, base)?,
        None => machine.load_object(name)?,
    };
    let summary = format!("{} from 0x{:06X}", program.name, program.entry);
    message(MsgColor::Green, "Loaded", &summary);
    Ok(machine)
}

fn run(
    name: &Path,
    base: Option<u32>,
    devices: &Path,
    tick: Duration,
    minimal: bool,
) -> Result<()> {
    Output::set_minimal(minimal);
    let machine = load(name, base, devices)?;

    message(MsgColor::Green, "Running", &format!("tick {tick:?}"));
    let mut driver = Driver::new(machine).with_tick(tick);
    driver.start();
    driver.wait()?;

    let pc = driver.lock().pc();
    message(MsgColor::Green, "Halted", &format!("at 0x{pc:06X}"));
    Ok(())
}

fn debug(
    name: &Path,
    base: Option<u32>,
    devices: &Path,
    command: Option<String>,
    minimal: bool,
) -> Result<()> {
    Output::set_minimal(minimal);
    let machine = load(name, base, devices)?;

    message(MsgColor::Cyan, "Help", "type `help` for a list of commands");
    let mut repl = Repl::new(Driver::new(machine), SourceMode::from(command));
    repl.run();

    file_message(MsgColor::Green, "Completed", name);
    Ok(())
}

fn parse_address(arg: &str) -> std::result::Result<u32, String> {
    let digits = arg.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|error| format!("`{arg}` is not a hex address: {error}"))
}

const SHORT_INFO: &str = r"
Welcome to sicxe, a virtual machine for SIC/XE object programs.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
