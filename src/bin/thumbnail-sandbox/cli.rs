use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "thumbnail-sandbox")]
#[command(version, about = "Run an external thumbnailer inside a sandbox", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Render a 256px preview with ImageMagick
    thumbnail-sandbox 'convert %i -thumbnail %sx%s png:%o' file:///tmp/cat.jpg -o cat.png

    # Refuse to run without the sandbox, kill after 10 seconds
    thumbnail-sandbox --require-sandbox --timeout 10 'evince-thumbnailer -s %s %u %o' ~/doc.pdf -o doc.png

    # Check sandbox requirements
    thumbnail-sandbox --check
")]
pub struct Cli {
    /// Thumbnailer command template (%i, %u, %o, %s, %%)
    #[arg(value_name = "COMMAND_TEMPLATE", required_unless_present = "check")]
    pub template: Option<String>,

    /// Source file URI or absolute path
    #[arg(value_name = "SOURCE_URI", required_unless_present = "check")]
    pub source: Option<String>,

    /// Where to write the thumbnail
    #[arg(short, long, value_name = "FILE", required_unless_present = "check")]
    pub output: Option<PathBuf>,

    /// Thumbnail size in pixels
    #[arg(short, long, value_name = "PX", default_value_t = 256)]
    pub size: u32,

    /// JSON engine configuration
    #[arg(short, long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Run the thumbnailer without a sandbox
    #[arg(long, conflicts_with = "require_sandbox")]
    pub no_sandbox: bool,

    /// Fail instead of running unsandboxed
    #[arg(long)]
    pub require_sandbox: bool,

    /// Allow profiling and tracing syscalls in the sandbox
    #[arg(long)]
    pub devel: bool,

    /// Kill the thumbnailer after this many seconds
    #[arg(short, long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Show verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Check sandbox requirements
    #[arg(long)]
    pub check: bool,
}
