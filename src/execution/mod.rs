//! Execution layer: temp resources, process spawning, output collection
//!
//! # Examples
//!
//! ```ignore
//! use thumbnail_sandbox::execution::{ProcessExecutor, ResultCollector, ScriptExecContext};
//!
//! let context = ScriptExecContext::new("convert %i %o", "file:///tmp/in.png", false)?;
//! let output = ProcessExecutor::new("convert").run(&argv, context.owned_fds())?;
//! let bytes = ResultCollector::read(context.host_output_path())?;
//! ```

pub mod context;
pub mod process;
pub use context::ScriptExecContext;
pub use process::{ProcessExecutor, ProcessOutput, ResultCollector};
