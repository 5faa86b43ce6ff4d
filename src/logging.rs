use std::io::Write;

use log::LevelFilter;

/// Install the process-wide logger. `RUST_LOG` takes precedence over `level`.
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .try_init();
}
