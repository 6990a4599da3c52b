use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Fallback for `RUST_LOG`, kept for existing `.env` files.
const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
pub const LOG_FILE: &str = "validation.log";

/// Initialise `env_logger`. With a `log_dir`, records also go to
/// `<log_dir>/validation.log`, appended across runs. Returns that path.
pub fn init_logging(log_dir: Option<&Path>) -> io::Result<Option<PathBuf>> {
    // RUST_LOG wins; otherwise LOG_LEVEL, otherwise info.
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder.filter_level(level_from(std::env::var(LOG_LEVEL_ENV).ok().as_deref()));
    }

    let log_path = match log_dir {
        Some(dir) => {
            let (path, file) = open_log_file(dir)?;
            builder.target(env_logger::Target::Pipe(Box::new(Tee::new(io::stderr(), file))));
            Some(path)
        }
        None => None,
    };

    let _ = builder.try_init();
    Ok(log_path)
}

fn open_log_file(dir: &Path) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(LOG_FILE);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

fn level_from(raw: Option<&str>) -> log::LevelFilter {
    raw.and_then(|v| v.trim().parse().ok())
        .unwrap_or(log::LevelFilter::Info)
}

/// Writes every record to the console and the log file.
struct Tee<A, B> {
    console: A,
    file: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    fn new(console: A, file: B) -> Self {
        Self { console, file }
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        self.console.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.console.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn level_parsing() {
        assert_eq!(level_from(Some("DEBUG")), log::LevelFilter::Debug);
        assert_eq!(level_from(Some("warning")), log::LevelFilter::Info);
        assert_eq!(level_from(Some(" error ")), log::LevelFilter::Error);
        assert_eq!(level_from(None), log::LevelFilter::Info);
    }

    #[test]
    fn tee_writes_both_sinks() {
        let mut tee = Tee::new(Vec::new(), Vec::new());
        write!(tee, "step_1 validated").unwrap();
        tee.flush().unwrap();
        assert_eq!(tee.console, b"step_1 validated");
        assert_eq!(tee.file, b"step_1 validated");
    }

    #[test]
    fn log_file_is_created_and_appended() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("output");

        let (path, mut file) = open_log_file(&dir).unwrap();
        writeln!(file, "first run").unwrap();
        let (again, mut file) = open_log_file(&dir).unwrap();
        writeln!(file, "second run").unwrap();

        assert_eq!(path, dir.join(LOG_FILE));
        assert_eq!(path, again);
        assert_eq!(fs::read_to_string(path).unwrap(), "first run\nsecond run\n");
    }
}
