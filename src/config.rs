//! Runtime configuration.

/// Default managed heap size.
pub const DEFAULT_HEAP_SIZE: usize = 64 * 1024;

/// Smallest heap the runtime accepts.
pub const MIN_HEAP_SIZE: usize = 1024;

/// Knobs fixed at initialization.
///
/// ```
/// use ilrt::RuntimeConfig;
///
/// let config = RuntimeConfig::new().heap_size(16 * 1024).stress_collect(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Size of the managed heap in bytes.
    pub heap_size: usize,
    /// Verify frame link order and chain length; on by default in debug builds.
    pub frame_checks: bool,
    /// Collect before every allocation.
    pub stress_collect: bool,
}

impl RuntimeConfig {
    pub const fn new() -> Self {
        RuntimeConfig {
            heap_size: DEFAULT_HEAP_SIZE,
            frame_checks: cfg!(debug_assertions),
            stress_collect: false,
        }
    }

    pub const fn heap_size(self, bytes: usize) -> Self {
        RuntimeConfig {
            heap_size: bytes,
            ..self
        }
    }

    pub const fn frame_checks(self, enabled: bool) -> Self {
        RuntimeConfig {
            frame_checks: enabled,
            ..self
        }
    }

    pub const fn stress_collect(self, enabled: bool) -> Self {
        RuntimeConfig {
            stress_collect: enabled,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.heap_size < MIN_HEAP_SIZE {
            return Err("config: heap size below 1 KiB");
        }
        if self.heap_size > u32::MAX as usize {
            return Err("config: heap size exceeds 4 GiB");
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}
