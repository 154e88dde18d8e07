//! Thumbnailer execution engine
//!
//! [`Engine::execute`] ties the layers together for one request:
//!
//! 1. resolve the sandbox policy against the probed capability
//! 2. plan temp resources ([`ScriptExecContext`])
//! 3. expand the command template against the paths the thumbnailer will see
//! 4. when sandboxed, export the seccomp program and prepend the launcher argv
//! 5. run, check the exit status, read the output file
//!
//! The context is dropped on every exit path, which removes its temp files.

use crate::capabilities::SandboxCapability;
use crate::config::EngineConfig;
use crate::errors::{Result, ThumbnailError};
use crate::execution::{ProcessExecutor, ResultCollector, ScriptExecContext};
use crate::isolation::bwrap::{LEGACY_DIRS, SANDBOX_PATH};
use crate::isolation::{NamespaceSandboxBuilder, SeccompCompiler, SeccompFilter};
use crate::template;
use log::{debug, info};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Sandboxed thumbnailer runner
///
/// Construct once per process and share by reference; `execute` may be
/// called from several threads at once.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    capability: SandboxCapability,
}

impl Engine {
    /// Probe the sandbox capability once and keep it for every call
    pub fn new(config: EngineConfig) -> Self {
        let capability = SandboxCapability::detect(&config.bwrap);
        info!(
            "Thumbnailer sandbox {} (policy {:?})",
            if capability.is_usable() {
                "available"
            } else {
                "unavailable"
            },
            config.sandbox
        );
        Self::with_capability(config, capability)
    }

    /// Use an already probed capability
    pub fn with_capability(config: EngineConfig, capability: SandboxCapability) -> Self {
        Self { config, capability }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn capability(&self) -> &SandboxCapability {
        &self.capability
    }

    /// Run `command_template` on `source_uri` and return the image bytes
    pub fn execute(&self, command_template: &str, size: u32, source_uri: &str) -> Result<Vec<u8>> {
        let sandboxed = self.config.sandbox.resolve(&self.capability)?;

        let words = template::split(command_template)?;
        let program = self.locate_program(&words[0], sandboxed)?;
        debug!("Thumbnailer {} resolved to {}", words[0], program.display());

        let mut context = ScriptExecContext::new(command_template, source_uri, sandboxed)?;
        self.run(&mut context, command_template, size)
    }

    /// Find the program as the thumbnailer's environment will.
    ///
    /// Sandboxed runs search the sandbox `PATH` and only accept programs
    /// under the trees bound into the sandbox.
    fn locate_program(&self, program: &str, sandboxed: bool) -> Result<PathBuf> {
        let not_found = |e: which::Error| ThumbnailError::Spawn {
            program: program.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, e),
        };

        if !sandboxed {
            return which::which(program).map_err(not_found);
        }

        let resolved = which::which_in(program, Some(SANDBOX_PATH), "/").map_err(not_found)?;
        if self.visible_in_sandbox(&resolved) {
            Ok(resolved)
        } else {
            Err(ThumbnailError::Spawn {
                program: program.to_string(),
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} is not bound into the sandbox", resolved.display()),
                ),
            })
        }
    }

    fn visible_in_sandbox(&self, path: &Path) -> bool {
        let mut roots = vec![PathBuf::from("/usr")];
        roots.extend(LEGACY_DIRS.iter().map(|dir| Path::new("/").join(dir)));
        roots.extend(self.config.install_prefix.clone());
        roots.iter().any(|root| path.starts_with(root))
    }

    fn run(
        &self,
        context: &mut ScriptExecContext,
        command_template: &str,
        size: u32,
    ) -> Result<Vec<u8>> {
        let mut argv = template::expand(
            command_template,
            size,
            context.effective_input_path(),
            context.effective_output_path(),
        )?
        .require_placeholders()?;

        if context.is_sandboxed() {
            argv = self.sandbox_argv(context, argv)?;
        }

        let executor =
            ProcessExecutor::new(context.thumbnailer_name()).timeout(self.config.timeout);
        let output = executor.run(&argv, context.owned_fds())?;
        let output = executor.check(output)?;
        debug!(
            "{} finished in {:?}",
            context.thumbnailer_name(),
            output.elapsed
        );

        ResultCollector::read(context.host_output_path())
    }

    /// Wrap `argv` in the launcher. Any failure here aborts the run.
    fn sandbox_argv(
        &self,
        context: &mut ScriptExecContext,
        argv: Vec<OsString>,
    ) -> Result<Vec<OsString>> {
        let launcher = self.capability.probe()?.to_path_buf();

        let filter = SeccompFilter::thumbnailer(self.config.devel)?;
        let seccomp_fd = context.adopt_fd(SeccompCompiler::export(&filter)?);

        let (temp_dir, sandbox_input) = match (context.host_temp_dir(), context.sandbox_input_path())
        {
            (Some(dir), Some(input)) => (dir, input),
            _ => {
                return Err(ThumbnailError::SandboxSetup(
                    "context has no sandbox paths".to_string(),
                ))
            }
        };

        let mut full = NamespaceSandboxBuilder::from_config(&self.config, &launcher).build(
            temp_dir,
            context.host_input_path(),
            sandbox_input,
            seccomp_fd,
        );
        full.extend(argv);
        Ok(full)
    }
}
