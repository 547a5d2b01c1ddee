use std::{cell::RefCell, ffi::OsStr, path::PathBuf, time::Duration};

use crate::driver::DEFAULT_TICK;

#[derive(Clone, Debug)]
struct Env {
    debug: bool,
    device_dir: PathBuf,
    tick: Duration,
}

thread_local! {
    /// Must only be mutated within `set_env`
    static ENV: RefCell<Option<Env>> = const { RefCell::new(None) };
}

pub fn init() {
    let value = Env {
        debug: var_is("SICXE_DEBUG", "1"),
        device_dir: std::env::var_os("SICXE_DEVICE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
        tick: std::env::var("SICXE_TICK_US")
            .ok()
            .and_then(|us| us.trim().parse().ok())
            .map(Duration::from_micros)
            .unwrap_or(DEFAULT_TICK),
    };
    set_env(value);
}

pub fn is_debug() -> bool {
    with_env(|env| env.debug)
}

/// Directory holding the backing files of devices 3 and up.
pub fn device_dir() -> PathBuf {
    with_env(|env| env.device_dir.clone())
}

/// Default interval between instructions in continuous mode.
pub fn tick() -> Duration {
    with_env(|env| env.tick)
}

fn set_env(value: Env) {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        assert!(
            env.is_none(),
            "tried to initialize environment state multiple times"
        );
        *env = Some(value);
    });
}

fn with_env<F, R>(callback: F) -> R
where
    F: Fn(&Env) -> R,
{
    ENV.with(|env| {
        let env = env.borrow();
        let env = env.as_ref().unwrap_or_else(|| {
            panic!("tried to access environment state before initialization");
        });
        callback(env)
    })
}

fn var_is(name: impl AsRef<OsStr>, value: impl AsRef<str>) -> bool {
    std::env::var(name.as_ref()).is_ok_and(|v| v == value.as_ref())
}
