use anyhow::{Context, Result};
use clap::Parser;
use field_assistant::config::{Config, OUTPUT_VOICE_CAPACITY};
use field_assistant::devices::DesktopDevices;
use field_assistant::gemini_adapter::GeminiTransport;
use field_core::{LiveConfig, SessionController, SessionState};
use field_native_utils::device;
use field_native_utils::speaker::Speaker;
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Talk to a live multimodal assistant about what your camera sees")]
struct Cli {
    /// Image file or directory of images used as the camera feed
    #[arg(long)]
    frames: Option<PathBuf>,
    /// Microphone to capture from (defaults to the host default)
    #[arg(long)]
    input_device: Option<String>,
    /// Speaker to play replies on (defaults to the host default)
    #[arg(long)]
    output_device: Option<String>,
    /// Print the available audio devices and exit
    #[arg(long)]
    list_devices: bool,
    /// Replace the default system instruction
    #[arg(long)]
    instruction: Option<String>,
    /// Downscale camera frames so the long edge is at most this many pixels
    #[arg(long)]
    max_dimension: Option<u32>,
}

fn print_devices() -> Result<()> {
    println!("Input devices:");
    for info in device::available_inputs()? {
        println!("{info}");
    }
    println!("Output devices:");
    for info in device::available_outputs()? {
        println!("{info}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    if args.list_devices {
        return print_devices();
    }

    // --- 4. Audio Output ---
    let (speaker, output) = Speaker::start(args.output_device.as_deref(), OUTPUT_VOICE_CAPACITY)
        .context("Failed to open audio output")?;
    tracing::info!("Speaker running at {}hz", speaker.sample_rate());

    // --- 5. Session Wiring ---
    let mut live = LiveConfig::builder().with_max_frame_dimension(args.max_dimension);
    if let Some(instruction) = &args.instruction {
        live = live.with_system_instruction(instruction);
    }
    let devices = DesktopDevices {
        input_device: args.input_device,
        frames: args.frames.or(config.frame_source),
    };
    let transport = GeminiTransport::new(config.gemini_api_key, config.model);
    let controller = SessionController::new(live.build(), devices, transport, Box::new(output));

    let mut transcript = controller.subscribe_transcript();
    let printer = tokio::spawn(async move {
        while transcript.changed().await.is_ok() {
            let line = transcript.borrow_and_update().last().cloned();
            if let Some(line) = line {
                println!("{line}");
            }
        }
    });

    // --- 6. Run Until Ctrl-C, Remote Close Or Error ---
    if let Err(e) = controller.start().await {
        printer.abort();
        return Err(e).context("Failed to start live session");
    }
    tracing::info!("Live session running, press Ctrl-C to stop");

    let mut state = controller.subscribe_state();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down...");
        }
        _ = state.wait_for(|s| !s.is_running()) => {}
    }
    controller.stop().await;
    printer.abort();
    tracing::info!("Session stats: {:?}", controller.stats());
    drop(speaker);

    match controller.state() {
        SessionState::Error { reason } => Err(reason).context("Live session failed"),
        _ => Ok(()),
    }
}
