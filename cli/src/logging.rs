use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::writer::MakeWriter;

/// Log target for the CLI: stderr always, plus an appended log file when `--log` is given.
///
/// Stdout is left to the JSON output.
#[derive(Clone)]
pub(crate) struct LogWriter {
    log_file: Option<Arc<Mutex<File>>>,
}

impl LogWriter {
    pub(crate) fn new(path: Option<PathBuf>) -> io::Result<Self> {
        let log_file = path
            .map(|path| OpenOptions::new().create(true).append(true).open(path))
            .transpose()?
            .map(|file| Arc::new(Mutex::new(file)));
        Ok(Self { log_file })
    }

    fn with_file(&self, f: impl FnOnce(&mut File) -> io::Result<()>) -> io::Result<()> {
        let Some(shared) = &self.log_file else {
            return Ok(());
        };
        let mut file = shared
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        f(&mut file)
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().lock().write_all(buf)?;
        self.with_file(|file| file.write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.with_file(File::flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_appended_to_the_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli.log");
        std::fs::write(&path, "earlier\n").unwrap();

        let writer = LogWriter::new(Some(path.clone())).unwrap();
        let mut handle = writer.make_writer();
        handle.write_all(b"hello\n").unwrap();
        handle.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\nhello\n");
    }

    #[test]
    fn stderr_only_without_a_path() {
        let mut writer = LogWriter::new(None).unwrap();
        assert_eq!(writer.write(b"x\n").unwrap(), 2);
    }
}
