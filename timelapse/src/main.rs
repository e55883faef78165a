use clap::Parser;
use flexi_logger::{
    colored_opt_format, opt_format, Cleanup, Criterion, Duplicate, FileSpec, Logger,
    LoggerHandle, Naming,
};
use log::{error, info};
use std::path::Path;
use timelapse::camera_api::FfmpegCameraBackend;
use timelapse::config::Args;
use timelapse::timelapse::clock::SystemClock;
use timelapse::timelapse::encoder::FfmpegVideoBackend;
use timelapse::timelapse::TimeLapseManufacturer;

fn start_logger(log_dir: Option<&Path>) -> anyhow::Result<LoggerHandle> {
    let logger = Logger::try_with_env_or_str("info")?.format(colored_opt_format);
    let logger = match log_dir {
        Some(dir) => logger
            .log_to_file(FileSpec::default().directory(dir))
            .format_for_files(opt_format)
            .duplicate_to_stderr(Duplicate::Info)
            .rotate(
                Criterion::Size(500_000),
                Naming::Numbers,
                Cleanup::KeepLogFiles(2),
            ),
        None => logger.log_to_stderr(),
    };
    Ok(logger.start()?)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _logger = start_logger(args.log_dir.as_deref())?;
    log_panics::init();
    info!("Starting up...");

    // invalid parameters are reported and the process still exits with 0
    let settings = match args.validate() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return Ok(());
        }
    };

    let manufacturer = TimeLapseManufacturer::new(
        settings,
        FfmpegCameraBackend::default(),
        FfmpegVideoBackend,
        SystemClock,
    );
    if let Err(e) = manufacturer.run() {
        if e.is_validation() {
            error!("{}", e);
        } else {
            error!("timelapse failed: {}", e);
        }
    }
    Ok(())
}
