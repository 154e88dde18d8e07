//! thumbnail-sandbox CLI - render one thumbnail with a sandboxed thumbnailer

mod cli;
mod commands;
mod logging;
mod runner;

use clap::Parser;
use cli::Cli;
use commands::check_requirements;
use console::style;
use runner::{run_thumbnailer, EngineFlags, RunConfig};

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", style("error:").red().bold(), message);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    let flags = EngineFlags {
        config: cli.config,
        no_sandbox: cli.no_sandbox,
        require_sandbox: cli.require_sandbox,
        devel: cli.devel,
        timeout: cli.timeout,
    };

    if cli.check {
        match flags.engine_config() {
            Ok(config) => check_requirements(&config.bwrap, config.devel),
            Err(e) => fail(e),
        }
        return;
    }

    let (Some(template), Some(source), Some(output)) = (cli.template, cli.source, cli.output)
    else {
        eprintln!(
            "Try {} for more information",
            style("thumbnail-sandbox --help").cyan()
        );
        fail("No thumbnailer command specified");
    };

    let config = RunConfig {
        template,
        source,
        output,
        size: cli.size,
        flags,
    };

    if let Err(e) = run_thumbnailer(config) {
        fail(e);
    }
}
