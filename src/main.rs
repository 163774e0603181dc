#[macro_use]
extern crate log;

use std::env::consts::{ARCH, EXE_SUFFIX, FAMILY, OS};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};

use anyhow::Error;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use crate::program::Program;

mod program;
mod reddit;

/// Name of the log file, written next to the config.
const LOG_NAME: &str = "subreddit_downloader.log";

/// Log lines between two flushes of [BufferedFileWriter].
const FLUSH_EVERY: usize = 50;

/// A buffered log file writer that flushes every [FLUSH_EVERY] lines and on drop.
///
/// [WriteLogger] already serializes access, so no locking happens here.
struct BufferedFileWriter {
    writer: BufWriter<File>,
    lines: usize,
}

impl BufferedFileWriter {
    fn new() -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(LOG_NAME)?;

        Ok(Self {
            writer: BufWriter::with_capacity(64 * 1024, file),
            lines: 0,
        })
    }
}

impl Write for BufferedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let size = self.writer.write(buf)?;

        let lines = buf[..size].iter().filter(|&&b| b == b'\n').count();
        let before = self.lines / FLUSH_EVERY;
        self.lines += lines;
        if self.lines / FLUSH_EVERY != before {
            self.writer.flush()?;
        }

        Ok(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for BufferedFileWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

fn main() -> Result<(), Error> {
    initialize_logger();
    log_system_information();

    let program = Program::new();
    program.run()
}

/// Initializes the logger: errors on the terminal, everything from this crate in the log file.
///
/// Per-post problems are only written to the file, the console shows progress and the summary.
fn initialize_logger() {
    let mut config = ConfigBuilder::new();
    config.add_filter_allow_str("subreddit_downloader");

    let buffered_file_writer = match BufferedFileWriter::new() {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!("Failed to create {}: {}. Logging will only output to terminal.", LOG_NAME, e);
            init_terminal_only();
            return;
        }
    };

    if let Err(e) = CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Error,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::max(), config.build(), buffered_file_writer),
    ]) {
        eprintln!("Failed to initialize combined logger: {}. Falling back to terminal-only logging.", e);
        init_terminal_only();
    }
}

fn init_terminal_only() {
    let _ = TermLogger::init(
        LevelFilter::Error,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("EXE_SUFFIX:     \"{}\"", EXE_SUFFIX);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}
