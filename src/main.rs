//! `lazyload` — a minimal, demand-paged loader for statically linked 32-bit
//! ELF executables. See `SPEC_FULL.md` for the full design; the fault
//! router in [`fault_router`] is the core of this crate.

mod config;
mod elf_image;
mod fault_router;
mod launcher;
mod logger;
mod page_table;
mod report;
mod sigsafe;
mod stats;
mod teardown;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use crate::elf_image::ElfImage;
use crate::fault_router::LoaderContext;

/// Demand-paged loader for statically linked 32-bit ELF executables.
#[derive(Parser, Debug)]
#[command(name = "lazyload", about, version)]
struct Cli {
    /// Path to the 32-bit ELF executable to load.
    path: PathBuf,

    /// Raise the log level; repeat for more detail (info, debug, trace).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    logger::setup(level);

    if cli.path.to_string_lossy().len() > config::MAX_PATH {
        log::error!("path exceeds the maximum accepted length of {} bytes", config::MAX_PATH);
        return ExitCode::FAILURE;
    }

    let image = match ElfImage::load(&cli.path) {
        Ok(image) => image,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    log::info!(
        "loaded {} loadable segment(s), entry at {:#x}",
        image.segments().len(),
        image.entry()
    );

    let context = LoaderContext::new(image);

    // SAFETY: `context.image.entry()` was validated at parse time to lie
    // inside a loadable segment (spec §4.4's precondition); the target
    // program is assumed single-threaded (spec §1 non-goals).
    let (entry_return, mut context) = unsafe { launcher::run(context) };

    for failure in teardown::release_all(&mut context.table) {
        log::warn!("failed to release page {:#x} at teardown", failure.page_vaddr);
    }

    if let Err(e) = report::write_report(std::io::stdout(), entry_return, &context.stats) {
        log::error!("failed to write report: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
