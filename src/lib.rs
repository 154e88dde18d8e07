//! thumbnail-sandbox: run untrusted thumbnailers in a sandbox
//!
//! Executes external thumbnailer programs from a command template, wrapped in
//! bubblewrap namespaces and a seccomp syscall filter, and returns the image
//! bytes they produce. Every temp file and descriptor of a run is released on
//! success and failure alike.
//!
//! # Modules
//!
//! - **template**: command template expansion (`%i`, `%u`, `%o`, `%s`, `%%`)
//! - **isolation**: seccomp BPF filter + bubblewrap argv
//! - **execution**: temp resources, process spawning, output collection
//! - **capabilities**: sandbox tooling detection
//! - **controller**: the [`Engine`] entry point
//!
//! # Example
//!
//! ```ignore
//! use thumbnail_sandbox::{Engine, EngineConfig};
//! use std::time::Duration;
//!
//! let engine = Engine::new(EngineConfig::new().timeout(Duration::from_secs(30)));
//! let png = engine.execute("convert %i -thumbnail %sx%s png:%o", 256, "file:///tmp/cat.jpg")?;
//! ```

// Core modules
pub mod capabilities;
pub mod config;
pub mod errors;
pub mod template;

// Layered modules
pub mod execution;
pub mod isolation;

// Main controller
pub mod controller;

// Public API
pub use capabilities::SandboxCapability;
pub use config::{EngineConfig, SandboxPolicy};
pub use controller::Engine;
pub use errors::{Result, ThumbnailError};
pub use execution::{ProcessExecutor, ResultCollector, ScriptExecContext};
pub use isolation::{NamespaceSandboxBuilder, SeccompCompiler, SeccompFilter};


#[cfg(test)]
pub mod test_support {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    pub fn serial_guard() -> MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
