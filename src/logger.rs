use log::{Level, LevelFilter, Metadata, Record};

/// `log` backend writing to the serial console.
struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl log::Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        crate::serial::_print(format_args!(
            "[{} {}] {}\n",
            level,
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// Install the serial logger. A second call only adjusts the level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
