//! Diagnostic sink for everything outside the fault router. Mirrors the
//! kernel's serial logger: a small `log::Log` implementation with the same
//! bracketed, colorized level prefixes, writing to stderr instead of a
//! serial port since this is a hosted process rather than a kernel.

struct Logger;

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let level = match record.level() {
                log::Level::Error => "\x1b[1m\x1b[31m[!]\x1b[0m",
                log::Level::Warn => "\x1b[1m\x1b[33m[-]\x1b[0m",
                log::Level::Info => "\x1b[1m\x1b[32m[*]\x1b[0m",
                log::Level::Debug => "\x1b[1m\x1b[34m[#]\x1b[0m",
                log::Level::Trace => "\x1b[1m[~]\x1b[0m",
            };
            eprintln!("{level} {}", record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;

/// Install the logger and set the max level. Must be called once, before
/// any other logging call.
///
/// # Panics
/// Panics if a logger has already been set.
pub fn setup(level: log::LevelFilter) {
    log::set_logger(&LOGGER).expect("logger already installed");
    log::set_max_level(level);
}
