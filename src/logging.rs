//! Logger setup for binaries built on phalanx.
//!
//! The library itself only talks to the [`log`] facade. Applications call [`init_log`] once at
//! startup to route those records to stderr.

use std::io::Write;

/// Installs an `env_logger` backend with a compact single-line format.
///
/// Defaults to `info`; `RUST_LOG` overrides the filter (e.g. `RUST_LOG=phalanx=debug`).
/// Calling this twice is harmless, the second call is ignored.
pub fn init_log() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "[{style}{:<5}{style:#}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
}
