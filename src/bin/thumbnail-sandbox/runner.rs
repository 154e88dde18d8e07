use log::{debug, info};
use std::path::PathBuf;
use std::time::Duration;
use thumbnail_sandbox::{Engine, EngineConfig, SandboxPolicy};

/// Flags that shape the engine configuration
pub struct EngineFlags {
    pub config: Option<PathBuf>,
    pub no_sandbox: bool,
    pub require_sandbox: bool,
    pub devel: bool,
    pub timeout: Option<u64>,
}

impl EngineFlags {
    /// Configuration file (if any) with flag overrides applied
    pub fn engine_config(&self) -> Result<EngineConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                EngineConfig::from_file(path)?
            }
            None => EngineConfig::default(),
        };

        if self.no_sandbox {
            config = config.sandbox(SandboxPolicy::Never);
        } else if self.require_sandbox {
            config = config.sandbox(SandboxPolicy::Always);
        }

        if self.devel {
            config = config.devel(true);
        }

        if let Some(t) = self.timeout {
            if t == 0 {
                return Err("timeout must be at least one second".into());
            }
            debug!("Overriding timeout: {}s", t);
            config = config.timeout(Duration::from_secs(t));
        }

        Ok(config)
    }
}

/// Configuration for one thumbnail run
pub struct RunConfig {
    pub template: String,
    pub source: String,
    pub output: PathBuf,
    pub size: u32,
    pub flags: EngineFlags,
}

pub fn run_thumbnailer(run: RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::new(run.flags.engine_config()?);
    debug!("{}", engine.capability().summary());

    let bytes = engine.execute(&run.template, run.size, &run.source)?;
    std::fs::write(&run.output, &bytes)?;

    info!("Wrote {} bytes to {}", bytes.len(), run.output.display());
    Ok(())
}
