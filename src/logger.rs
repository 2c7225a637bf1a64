//! Diagnostic logging backend.
//!
//! The runtime logs through the `log` facade. Embedded hosts rarely have an
//! output channel ready when the runtime comes up, so [`DiagnosticLogger`]
//! buffers formatted records in a fixed buffer until a sink is installed,
//! then replays the buffer into the sink and writes through from then on.

use conquer_once::spin::OnceCell;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

const BUFFER_SIZE: usize = 4096;

/// Receives formatted log output, one or more pieces per record.
pub type LogSink = fn(&str);

/// Buffer for storing log messages before a sink is installed
struct LogBuffer {
    buffer: [u8; BUFFER_SIZE],
    position: usize,
    dropped: usize,
}

impl LogBuffer {
    const fn new() -> Self {
        Self {
            buffer: [0; BUFFER_SIZE],
            position: 0,
            dropped: 0,
        }
    }

    fn push(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let remaining = BUFFER_SIZE - self.position;
        if bytes.len() > remaining {
            // Keep the oldest output; early messages matter most.
            self.dropped += bytes.len();
            return;
        }
        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
    }

    fn contents(&self) -> &str {
        core::str::from_utf8(&self.buffer[..self.position]).unwrap_or("<invalid UTF-8>")
    }

    fn clear(&mut self) {
        self.position = 0;
        self.dropped = 0;
    }
}

impl Write for LogBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push(s);
        Ok(())
    }
}

struct SinkWriter(LogSink);

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        (self.0)(s);
        Ok(())
    }
}

pub struct DiagnosticLogger {
    buffer: Mutex<LogBuffer>,
    sink: OnceCell<LogSink>,
}

impl DiagnosticLogger {
    pub const fn new() -> Self {
        DiagnosticLogger {
            buffer: Mutex::new(LogBuffer::new()),
            sink: OnceCell::uninit(),
        }
    }

    /// Install the output sink and replay buffered records into it.
    ///
    /// Returns false if a sink was already installed.
    pub fn set_sink(&self, sink: LogSink) -> bool {
        if self.sink.try_init_once(|| sink).is_err() {
            return false;
        }
        self.flush();
        true
    }

    /// Run `f` over the buffered, not yet delivered output.
    pub fn with_buffered<T>(&self, f: impl FnOnce(&str) -> T) -> T {
        f(self.buffer.lock().contents())
    }
}

impl Default for DiagnosticLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for DiagnosticLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = record.level();
        let target = record.target();
        let args = record.args();

        match self.sink.get() {
            Some(sink) => {
                let _ = writeln!(SinkWriter(*sink), "[{:>5}] {}: {}", level, target, args);
            }
            None => {
                // try_lock: a fatal error raised while formatting must not deadlock
                if let Some(mut buffer) = self.buffer.try_lock() {
                    let _ = writeln!(&mut *buffer, "[{:>5}] {}: {}", level, target, args);
                }
            }
        }
    }

    fn flush(&self) {
        let Some(sink) = self.sink.get() else { return };
        let mut buffer = self.buffer.lock();
        if buffer.position > 0 {
            sink(buffer.contents());
            if buffer.dropped > 0 {
                let _ = writeln!(
                    SinkWriter(*sink),
                    "[ WARN] ilrt: {} bytes of early log output dropped",
                    buffer.dropped
                );
            }
            buffer.clear();
        }
    }
}

pub static LOGGER: DiagnosticLogger = DiagnosticLogger::new();

/// Install [`LOGGER`] as the global logger.
pub fn init(level: LevelFilter) -> Result<(), &'static str> {
    log::set_logger(&LOGGER).map_err(|_| "logger: a global logger is already set")?;
    log::set_max_level(level);
    Ok(())
}

/// Route the global logger's output to `sink`.
pub fn set_sink(sink: LogSink) -> bool {
    LOGGER.set_sink(sink)
}

/// A sink for hosted targets.
#[cfg(feature = "std")]
pub fn stderr_sink(s: &str) {
    eprint!("{}", s);
}
