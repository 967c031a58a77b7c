use anyhow::Result;
use chrono::Utc;
use log::LevelFilter;

/// Sets up the process-wide logger: our own crate traced at `Trace` on
/// stdout, everything else at `Info`; `Warn`-and-above also goes to
/// `log_path`. Mirrors the teacher's `fern::Dispatch` shape.
pub fn init_logger(log_path: &str) -> Result<()> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .chain(
            fern::Dispatch::new()
                .level(LevelFilter::Info)
                .level_for("mmb_lib", LevelFilter::Trace)
                .chain(std::io::stdout()),
        )
        .chain(
            fern::Dispatch::new().level(LevelFilter::Warn).chain(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .append(true)
                    .open(log_path)?,
            ),
        )
        .apply()?;

    Ok(())
}
