use chrono::Local;
use log::{Log, Metadata, Record};
use once_cell::sync::OnceCell;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Process-wide `log` backend writing to stderr and, optionally, a file.
///
/// ```no_run
/// kvdir::logger::Logger::init().add_file("/tmp/kvdir.log", true);
/// log::set_max_level(log::LevelFilter::Info);
/// ```
pub struct Logger {
    console: AtomicBool,
    file: Mutex<Option<File>>,
}

static LOGGER: OnceCell<Logger> = OnceCell::new();

impl Logger {
    pub fn init() -> &'static Logger {
        let logger = LOGGER.get_or_init(|| Logger {
            console: AtomicBool::new(true),
            file: Mutex::new(None),
        });
        // a second init keeps the installed logger
        let _ = log::set_logger(logger);
        logger
    }

    pub fn add_file(&self, path: &str, truncate: bool) -> &Self {
        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!truncate)
            .truncate(truncate)
            .open(path);
        match f {
            Ok(f) => *self.file.lock().unwrap() = Some(f),
            Err(e) => eprintln!("can't open log file {} error {}", path, e),
        }
        self
    }

    pub fn remove_console(&self) -> &Self {
        self.console.store(false, Ordering::Relaxed);
        self
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {:<5} {} {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        );
        if self.console.load(Ordering::Relaxed) {
            let _ = std::io::stderr().write_all(line.as_bytes());
        }
        if let Some(f) = self.file.lock().unwrap().as_mut() {
            let _ = f.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Some(f) = self.file.lock().unwrap().as_mut() {
            let _ = f.flush();
        }
    }
}
