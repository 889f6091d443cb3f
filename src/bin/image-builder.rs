use std::env;

use anyhow::{bail, Result};

use image_builder::config::BuildConfig;
use image_builder::privilege::{self, Resume};
use image_builder::process::Cmd;
use image_builder::recipe::pipeline;
use image_builder::{logger, preflight, Session};

fn usage() -> &'static str {
    "Usage:\n  image-builder              build the Raspberry Pi package set\n  image-builder preflight    check host tools and exit\n\nThe form `image-builder resume <sudo|fakeroot> <state-file> <step>` is\nthe internal re-entry point for privilege elevation and is not meant to\nbe invoked directly."
}

fn main() -> Result<()> {
    logger::init();
    let args: Vec<String> = env::args().skip(1).collect();

    let result = run(&args);

    // Post-mortem hook: drop into a shell in the build's working
    // directory whether the pipeline succeeded or not.
    if inspection_shell_requested() {
        open_inspection_shell();
    }

    result
}

fn run(args: &[String]) -> Result<()> {
    match args {
        [] => {
            let mut session = Session::new();
            let registry = pipeline::registry();
            session.scope(|s| {
                preflight::check_host_tools()?;
                let cwd = env::current_dir()?;
                let config = BuildConfig::load(&cwd)?;
                pipeline::run(s, &registry, &config)
            })
        }
        [cmd] if cmd == "preflight" => preflight::check_host_tools(),
        [cmd, ..] if cmd == "resume" => {
            let mut session = Session::new();
            let registry = pipeline::registry();
            session.scope(|s| match privilege::try_resume(s, &registry, args)? {
                Resume::Completed => Ok(()),
                Resume::NotRequested => bail!(usage()),
            })
        }
        _ => bail!(usage()),
    }
}

fn inspection_shell_requested() -> bool {
    env::var("IMAGE_BUILDER_SHELL")
        .map(|value| value == "1")
        .unwrap_or(false)
}

fn open_inspection_shell() {
    let shell = env::var("SHELL").unwrap_or_else(|_| "sh".to_string());
    // The build outcome is already decided; a shell that fails to start
    // changes nothing.
    let _ = Cmd::new(shell).allow_fail().run_interactive();
}
