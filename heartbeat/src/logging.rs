//! Per-actor logger setup on top of `env_logger`.
//!
//! Each actor runs in its own process and gets its own logger.  With a log
//! directory every line goes to `<dir>/<actor>.log` (truncated at start-up),
//! otherwise to stderr.  `RUST_LOG` overrides the default `info` filter.
//!
//! Request/response records (target [`RECORD_TARGET`]) are written bare so
//! the log file doubles as the record file; everything else carries a
//! timestamp, level and the actor name.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use env_logger::{Builder, Env, Target};

use crate::error::Result;
use crate::record::{RECORD_TARGET, TIMESTAMP_FORMAT};

/// Install the global logger for `actor`.
///
/// Returns the log file path when `log_dir` is given.
pub fn init(actor: &str, log_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    let actor_name = actor.to_string();
    builder.format(move |buf, record| {
        if record.target() == RECORD_TARGET {
            writeln!(buf, "{}", record.args())
        } else {
            writeln!(
                buf,
                "{} {:<5} {actor_name}: {}",
                Utc::now().format(TIMESTAMP_FORMAT),
                record.level(),
                record.args()
            )
        }
    });

    let path = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let path = dir.join(format!("{actor}.log"));
            builder.target(Target::Pipe(Box::new(File::create(&path)?)));
            Some(path)
        }
        None => None,
    };

    builder.try_init()?;
    Ok(path)
}
