//! Per-execution temp resources
//!
//! A [`ScriptExecContext`] plans every path one thumbnailer run touches and
//! removes all of them again, on success or failure.
//!
//! Sandboxed layout (host side):
//!
//! ```text
//! $TMPDIR/thumbnail-sandbox-XXXXXX/        -> /tmp
//!     thumbnail-input.<ext>                -> /tmp/thumbnail-input.<ext> (ro bind of the real input)
//!     thumbnail-output.png                 -> /tmp/thumbnail-output.png
//! ```

use crate::errors::{Result, ThumbnailError};
use crate::isolation::bwrap::SANDBOX_TMP;
use crate::template;
use log::{debug, error};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use url::Url;

const TEMP_PREFIX: &str = "thumbnail-sandbox-";
const INPUT_STEM: &str = "thumbnail-input";
const OUTPUT_NAME: &str = "thumbnail-output.png";

/// Resolve a source URI to a local path.
///
/// Accepts `file://` URIs and bare absolute paths.
pub fn resolve_local_path(source_uri: &str) -> Result<PathBuf> {
    if source_uri.starts_with('/') {
        return Ok(PathBuf::from(source_uri));
    }

    let url = Url::parse(source_uri)
        .map_err(|_| ThumbnailError::UnsupportedUriScheme(source_uri.to_string()))?;
    if url.scheme() != "file" {
        return Err(ThumbnailError::UnsupportedUriScheme(source_uri.to_string()));
    }
    url.to_file_path()
        .map_err(|_| ThumbnailError::UnsupportedUriScheme(source_uri.to_string()))
}

/// Synthetic input file name, keeping the original extension byte for byte
pub fn input_alias_name(input: &Path) -> OsString {
    let mut name = OsString::from(INPUT_STEM);
    if let Some(ext) = input.extension() {
        name.push(".");
        name.push(ext);
    }
    name
}

/// Temp resources of one thumbnailer execution
#[derive(Debug)]
pub struct ScriptExecContext {
    sandboxed: bool,
    thumbnailer_name: String,
    owned_fds: Vec<OwnedFd>,
    host_input_path: PathBuf,
    host_output_path: PathBuf,
    host_temp_input_path: Option<PathBuf>,
    host_temp_dir: Option<PathBuf>,
    sandbox_input_path: Option<PathBuf>,
    sandbox_output_path: Option<PathBuf>,
    cleaned_up: bool,
}

impl ScriptExecContext {
    /// Plan and create the temp resources for one run
    pub fn new(command_template: &str, source_uri: &str, sandboxed: bool) -> Result<Self> {
        let host_input_path = resolve_local_path(source_uri)?;
        let thumbnailer_name = template::program_name(command_template).unwrap_or_default();

        if sandboxed {
            Self::new_sandboxed(thumbnailer_name, host_input_path)
        } else {
            Self::new_direct(thumbnailer_name, host_input_path)
        }
    }

    fn new_sandboxed(thumbnailer_name: String, host_input_path: PathBuf) -> Result<Self> {
        let template = std::env::temp_dir().join(format!("{}XXXXXX", TEMP_PREFIX));
        let temp_dir = nix::unistd::mkdtemp(&template).map_err(io::Error::from)?;

        let input_name = input_alias_name(&host_input_path);
        let sandbox_tmp = Path::new(SANDBOX_TMP);

        let context = Self {
            sandboxed: true,
            thumbnailer_name,
            owned_fds: Vec::new(),
            host_output_path: temp_dir.join(OUTPUT_NAME),
            host_temp_input_path: Some(temp_dir.join(&input_name)),
            sandbox_input_path: Some(sandbox_tmp.join(&input_name)),
            sandbox_output_path: Some(sandbox_tmp.join(OUTPUT_NAME)),
            host_temp_dir: Some(temp_dir),
            host_input_path,
            cleaned_up: false,
        };

        // From here on Drop removes whatever was created
        fs::File::create(&context.host_output_path)?;
        if let Some(alias) = &context.host_temp_input_path {
            // Mount point for the read-only input bind
            fs::File::create(alias)?;
        }

        debug!(
            "Sandboxed context for {} in {}",
            context.host_input_path.display(),
            context.host_output_path.display()
        );
        Ok(context)
    }

    fn new_direct(thumbnailer_name: String, host_input_path: PathBuf) -> Result<Self> {
        let output = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".png")
            .tempfile()?
            .into_temp_path()
            .keep()
            .map_err(io::Error::from)?;

        Ok(Self {
            sandboxed: false,
            thumbnailer_name,
            owned_fds: Vec::new(),
            host_input_path,
            host_output_path: output,
            host_temp_input_path: None,
            host_temp_dir: None,
            sandbox_input_path: None,
            sandbox_output_path: None,
            cleaned_up: false,
        })
    }

    /// Whether the run is sandboxed
    pub fn is_sandboxed(&self) -> bool {
        self.sandboxed
    }

    /// First word of the command template
    pub fn thumbnailer_name(&self) -> &str {
        &self.thumbnailer_name
    }

    pub fn host_input_path(&self) -> &Path {
        &self.host_input_path
    }

    pub fn host_output_path(&self) -> &Path {
        &self.host_output_path
    }

    pub fn host_temp_input_path(&self) -> Option<&Path> {
        self.host_temp_input_path.as_deref()
    }

    pub fn host_temp_dir(&self) -> Option<&Path> {
        self.host_temp_dir.as_deref()
    }

    pub fn sandbox_input_path(&self) -> Option<&Path> {
        self.sandbox_input_path.as_deref()
    }

    pub fn sandbox_output_path(&self) -> Option<&Path> {
        self.sandbox_output_path.as_deref()
    }

    /// Input path as the thumbnailer sees it
    pub fn effective_input_path(&self) -> &Path {
        self.sandbox_input_path
            .as_deref()
            .unwrap_or(&self.host_input_path)
    }

    /// Output path as the thumbnailer sees it
    pub fn effective_output_path(&self) -> &Path {
        self.sandbox_output_path
            .as_deref()
            .unwrap_or(&self.host_output_path)
    }

    /// Take ownership of a descriptor the child must inherit
    pub fn adopt_fd(&mut self, fd: OwnedFd) -> RawFd {
        let raw = fd.as_raw_fd();
        self.owned_fds.push(fd);
        raw
    }

    /// Descriptors to pass across exec
    pub fn owned_fds(&self) -> &[OwnedFd] {
        &self.owned_fds
    }

    /// Remove all temp resources. Only the first call does any work.
    ///
    /// Extra files left in the temp directory are not deleted; the
    /// directory removal then fails with [`ThumbnailError::Cleanup`].
    pub fn cleanup(&mut self) -> Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;
        self.owned_fds.clear();

        let mut result = remove_file_if_exists(&self.host_output_path);
        if let Some(alias) = &self.host_temp_input_path {
            result = result.and(remove_file_if_exists(alias));
        }
        if let Some(dir) = &self.host_temp_dir {
            result = result.and(remove_dir_if_exists(dir));
        }
        result
    }
}

impl Drop for ScriptExecContext {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            error!("Thumbnailer {}: {}", self.thumbnailer_name, e);
        }
    }
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    ignore_missing(path, fs::remove_file(path))
}

/// Non-recursive: unknown leftovers make this fail
fn remove_dir_if_exists(path: &Path) -> Result<()> {
    ignore_missing(path, fs::remove_dir(path))
}

fn ignore_missing(path: &Path, result: io::Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ThumbnailError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}
