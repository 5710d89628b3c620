use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tape_capture::commands::{capture, CaptureRequest};
use tape_capture::utils::{ErrorResponse, DEFAULT_TIMESPAN};
use tokio_util::sync::CancellationToken;

/// Capture a VCR tape to a lossless file
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Serial port of the JLIP deck
    #[arg(short, long, env = "TAPE_CAPTURE_SERIAL")]
    serial: String,

    /// ALSA capture device, e.g. hw:2,0
    #[arg(short, long)]
    audio_device: String,

    /// PipeWire device name, when it differs from the USB product name
    #[arg(long)]
    audio_device_name: Option<String>,

    /// V4L2 video device
    #[arg(short, long)]
    video_device: String,

    /// VBI device for the ancillary capture
    #[arg(short = 'b', long)]
    vbi_device: Option<String>,

    /// Capture card input line
    #[arg(short, long, default_value_t = 2)]
    input_index: u32,

    /// Maximum capture length (372m, 1h30m, 45:00, ...)
    #[arg(short, long, default_value = DEFAULT_TIMESPAN)]
    timespan: String,

    /// Transport poll interval in milliseconds (minimum 100)
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,

    /// JLIP id of the deck
    #[arg(long, default_value_t = 1)]
    jlip_id: u8,

    /// Leave the tape where it stopped
    #[arg(long)]
    no_rewind: bool,

    /// Verbose logging
    #[arg(short, long)]
    debug: bool,

    /// Output file
    output: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tape_capture::init_tracing(cli.debug);

    let request = CaptureRequest {
        serial: cli.serial,
        jlip_id: cli.jlip_id,
        audio_device: cli.audio_device,
        audio_device_name: cli.audio_device_name,
        video_device: cli.video_device,
        vbi_device: cli.vbi_device,
        input_index: cli.input_index,
        timespan: cli.timespan,
        poll_interval: Duration::from_millis(cli.poll_interval_ms),
        rewind_after: !cli.no_rewind,
        output: cli.output,
    };

    let interrupt = CancellationToken::new();
    let trigger = interrupt.clone();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                tracing::warn!("Shutdown signal received, stopping capture");
                trigger.cancel();
            }
            Err(e) => tracing::error!("Failed to install signal handlers: {}", e),
        }
    });

    match capture(&request, interrupt).await {
        Ok(outcome) => {
            let summary = serde_json::to_string(&outcome).context("Failed to serialize summary")?;
            tracing::info!("Summary: {}", summary);
            let code = outcome.exit_code();
            let output = outcome.output_path.clone();
            if let Err(e) = outcome.into_result() {
                tracing::error!("{}; partial output left at {}", e, output.display());
            }
            std::process::exit(code);
        }
        Err(e) => {
            let response = ErrorResponse::from(&e);
            tracing::error!("{} ({})", response.message, response.code);
            std::process::exit(1);
        }
    }
}

/// Resolves on Ctrl-C, or on SIGTERM/SIGQUIT from a service manager
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
