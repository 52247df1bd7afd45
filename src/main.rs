use std::io::prelude::*;

use anyhow::Result;
use env_logger::Builder;
use log::{Level, LevelFilter};
use owo_colors::OwoColorize;
use rcedit_pe::prelude::*;

mod cli;
use cli::Action;

fn color_level(level: Level) -> String {
    match level {
        Level::Error => level.red().to_string(),
        Level::Warn => level.yellow().to_string(),
        Level::Info => level.green().to_string(),
        Level::Debug => level.blue().to_string(),
        Level::Trace => level.purple().to_string(),
    }
}

const fn level_filter(verbose: usize) -> LevelFilter {
    match verbose {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5.. => LevelFilter::Trace,
        0 => LevelFilter::Off,
    }
}

fn fatal(message: impl std::fmt::Display) -> ! {
    eprintln!("Fatal error: {message}");
    std::process::exit(1);
}

fn main() -> Result<()> {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let args = match cli::parse(&raw_args) {
        Ok(args) => args,
        Err(error) => fatal(error),
    };

    if args.verbose != 0 {
        Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{}] {} {}",
                    rcedit_core::time::current_time(),
                    color_level(record.level()),
                    record.args()
                )
            })
            .filter(None, level_filter(args.verbose))
            .init();
    }

    if args.help {
        print!("{}", cli::USAGE);
        return Ok(());
    }

    #[cfg(windows)]
    let mut updater = ResourceUpdater::new(WindowsCollaborator::new());
    #[cfg(not(windows))]
    let mut updater = ResourceUpdater::new(PortableCollaborator::new());

    let file_size = std::fs::metadata(&args.file).map(|meta| meta.len()).unwrap_or_default();
    log::info!("Loading {} ({})", args.file.display(), rcedit_core::util::format_size(file_size as usize));
    if let Err(error) = updater.load(&args.file) {
        fatal(error);
    }

    for action in &args.actions {
        match action {
            Action::GetVersionString { key } => match updater.get_version_string(None, key) {
                Some(value) => {
                    println!("{value}");
                    return Ok(());
                }
                None => fatal(format!("no such version string: {key}")),
            },
            Action::GetResourceString { id } => match updater.get_resource_string(None, *id) {
                Some(value) => {
                    println!("{value}");
                    return Ok(());
                }
                None => fatal(format!("no such resource string: {id}")),
            },
            _ => {}
        }
    }

    let mut actions = args.actions;
    let has_manifest = actions.iter().any(|a| matches!(a, Action::SetApplicationManifest { .. }));
    let has_exec_level = actions.iter().any(|a| matches!(a, Action::SetRequestedExecutionLevel { .. }));
    if has_manifest && has_exec_level {
        eprintln!("Warning: --application-manifest and --set-requested-execution-level both given; the explicit manifest wins");
        actions.retain(|a| !matches!(a, Action::SetRequestedExecutionLevel { .. }));
    }

    for action in actions {
        let result = apply(&mut updater, action);
        if let Err(error) = result {
            fatal(error);
        }
    }

    log::info!("Committing changes to {}", args.file.display());
    if let Err(error) = updater.commit() {
        fatal(error);
    }

    Ok(())
}

fn apply(updater: &mut ResourceUpdater<impl Collaborator>, action: Action) -> Result<()> {
    match action {
        Action::SetVersionString { key, value } => {
            updater.set_version_string(None, &key, &value)?;
        }
        Action::SetFileVersion { v1, v2, v3, v4 } => {
            updater.set_file_version(None, v1, v2, v3, v4)?;
            let value = format!("{v1}.{v2}.{v3}.{v4}");
            updater.set_version_string(None, "FileVersion", &value)?;
        }
        Action::SetProductVersion { v1, v2, v3, v4 } => {
            updater.set_product_version(None, v1, v2, v3, v4)?;
            let value = format!("{v1}.{v2}.{v3}.{v4}");
            updater.set_version_string(None, "ProductVersion", &value)?;
        }
        Action::SetIcon { path } => {
            let bytes = std::fs::read(&path)?;
            updater.set_icon(None, None, &bytes)?;
        }
        Action::SetRequestedExecutionLevel { level } => {
            updater.set_requested_execution_level(&level)?;
        }
        Action::SetApplicationManifest { path } => {
            let bytes = std::fs::read(&path)?;
            updater.set_application_manifest(bytes)?;
        }
        Action::SetResourceString { id, value } => {
            updater.set_resource_string(None, id, &value)?;
        }
        Action::SetRcdata { id, path } => {
            let bytes = std::fs::read(&path)?;
            updater.set_rcdata(None, id, bytes)?;
        }
        Action::GetVersionString { .. } | Action::GetResourceString { .. } => unreachable!("handled before Commit"),
    }
    Ok(())
}
