//! Tracing setup for the prl tools.
//!
//! Configuration comes from the environment:
//! - `LOG_LEVEL`: default filter when `RUST_LOG` is unset (default `warn`)
//! - `LOG_OUTPUT`: `console`, `file`, `both` or `none` (default `console`)
//! - `LOG_FORMAT`: `human` or `json` (default `human`)
//! - `LOG_FILE_PATH`: log file for `file`/`both` (default `/tmp/prl.log`, rotated daily)

use std::{
    env,
    io::{self, Write},
    path::Path,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

const DEFAULT_LOG_FILE: &str = "/tmp/prl.log";

/// Writes every buffer to both inner writers.
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write_all(buf);
        let res_b = self.b.write_all(buf);
        res_a.and(res_b).map(|_| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = Tee<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Console,
    File,
    Both,
    None,
}

impl Output {
    fn parse(value: &str) -> Self {
        match value {
            "file" => Output::File,
            "both" => Output::Both,
            "none" => Output::None,
            _ => Output::Console,
        }
    }
}

/// Initializes the global tracing subscriber based on environment variables.
///
/// Logs go to stderr so that command output on stdout stays parseable. The
/// returned guard must be held for the life of the program when file output
/// is enabled, otherwise buffered lines are lost on exit.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with_default_level("warn")
}

/// Same as [`init_subscriber`] with an explicit fallback level, used for `--debug`.
pub fn init_with_default_level(default_level: &str) -> Option<WorkerGuard> {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
    let output = Output::parse(&env::var("LOG_OUTPUT").unwrap_or_default());
    let is_json = env::var("LOG_FORMAT").is_ok_and(|f| f == "json");
    let log_file_path = env::var("LOG_FILE_PATH").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));
    let subscriber = registry().with(env_filter);

    let log_path = Path::new(&log_file_path);
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("/tmp"));
    let log_filename = log_path.file_name().unwrap_or("prl.log".as_ref());

    let mut guard = None;
    let result = match output {
        Output::None => subscriber.try_init(),
        Output::Console => {
            let layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);
            if is_json {
                subscriber.with(layer.json()).try_init()
            } else {
                subscriber.with(layer).try_init()
            }
        }
        Output::File => {
            let appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard = Some(worker);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            if is_json {
                subscriber.with(layer.json()).try_init()
            } else {
                subscriber.with(layer).try_init()
            }
        }
        Output::Both => {
            let appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard = Some(worker);
            let tee = MakeTee {
                make_a: io::stderr,
                make_b: writer,
            };
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(tee);
            if is_json {
                subscriber.with(layer.json()).try_init()
            } else {
                subscriber.with(layer).try_init()
            }
        }
    };

    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {e}");
    }
    guard
}
