//! The host capability surface the VM executes against.
//!
//! The VM owns linear memory and calls out through [`Sandbox`] at its
//! suspension points (`syscall`, `vsm`, `vrs`, `time`, `igks`, `iwkd`).
//! Any capability may fail, which terminates execution with
//! `SANDBOX_ERROR`. A windowed host typically runs its rendering and
//! input loop on a separate thread and communicates through
//! [`SandboxFlags`]; the framebuffer itself is handed to the sandbox as a
//! borrowed slice at each call, and scan-out is allowed to tear within a
//! frame.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use crate::bytecode::{Key, VideoStorageFormat, VideoUpdateMode};
use crate::vm::TermInfo;

/// Shared state handed to the sandbox at initialization.
pub struct ExecContext<'a> {
    pub memory: &'a [u8],
    pub memory_size: u32,
}

/// Cross-thread flags for hosts that render and poll input in parallel
/// with VM execution. All accesses use relaxed ordering; the only shared
/// mutable region is the VM memory, which the host only reads.
#[derive(Debug, Default)]
pub struct SandboxFlags {
    pub should_terminate: AtomicBool,
    pub is_terminated: AtomicBool,
    pub always_update: AtomicBool,
    pub manual_update_requested: AtomicBool,
    pub pixel_storage_format: AtomicU32,
}

impl SandboxFlags {
    pub fn request_termination(&self) {
        self.should_terminate.store(true, Ordering::Relaxed);
    }

    pub fn termination_requested(&self) -> bool {
        self.should_terminate.load(Ordering::Relaxed)
    }
}

/// Host capabilities required by the VM. Boolean-style failures are
/// expressed as `false`/`None` and terminate execution.
pub trait Sandbox {
    /// One-shot setup. If this fails, no further callbacks are made.
    fn initialize(&mut self, ctx: ExecContext<'_>) -> bool;

    /// Called exactly once after any non-initialization exit.
    fn terminate(&mut self, info: &TermInfo);

    /// Seconds since execution started.
    fn get_execution_time(&mut self) -> Option<f32>;

    fn set_video_mode(&mut self, format: VideoStorageFormat, mode: VideoUpdateMode) -> bool;

    /// Deliver a refresh request; the pixel push may happen later.
    fn refresh_screen(&mut self, memory: &[u8]) -> bool;

    /// Block until a key is pressed.
    fn wait_key_down(&mut self) -> Option<Key>;

    fn get_key_state(&mut self, key: Key) -> Option<bool>;

    fn read_float64(&mut self) -> f64;

    fn write_float64(&mut self, value: f64);

    /// Polled by the VM at every suspension point; returning true exits
    /// execution with `SANDBOX_ERROR`.
    fn should_terminate(&self) -> bool {
        false
    }
}

/// A windowless sandbox: floats go through stdin/stdout, key waits read a
/// line from stdin, video calls are accepted and recorded in the flags.
pub struct HeadlessSandbox {
    started: Option<Instant>,
    flags: SandboxFlags,
}

impl HeadlessSandbox {
    pub fn new() -> Self {
        Self {
            started: None,
            flags: SandboxFlags::default(),
        }
    }

    pub fn flags(&self) -> &SandboxFlags {
        &self.flags
    }
}

impl Default for HeadlessSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox for HeadlessSandbox {
    fn initialize(&mut self, _ctx: ExecContext<'_>) -> bool {
        self.started = Some(Instant::now());
        true
    }

    fn terminate(&mut self, _info: &TermInfo) {
        self.flags.is_terminated.store(true, Ordering::Relaxed);
    }

    fn get_execution_time(&mut self) -> Option<f32> {
        self.started.map(|t| t.elapsed().as_secs_f32())
    }

    fn set_video_mode(&mut self, format: VideoStorageFormat, mode: VideoUpdateMode) -> bool {
        self.flags
            .pixel_storage_format
            .store(format as u32, Ordering::Relaxed);
        self.flags
            .always_update
            .store(mode == VideoUpdateMode::Immediate, Ordering::Relaxed);
        true
    }

    fn refresh_screen(&mut self, _memory: &[u8]) -> bool {
        self.flags
            .manual_update_requested
            .store(true, Ordering::Relaxed);
        true
    }

    fn wait_key_down(&mut self) -> Option<Key> {
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line).ok()?;
        if read == 0 {
            return None;
        }
        let byte = line.trim().bytes().next()?;
        Key::from_u32(byte.to_ascii_uppercase() as u32)
    }

    fn get_key_state(&mut self, _key: Key) -> Option<bool> {
        // no live keyboard without a window
        Some(false)
    }

    fn read_float64(&mut self) -> f64 {
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return 0.0;
        }
        line.trim().parse().unwrap_or(0.0)
    }

    fn write_float64(&mut self, value: f64) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", value);
    }

    fn should_terminate(&self) -> bool {
        self.flags.termination_requested()
    }
}
