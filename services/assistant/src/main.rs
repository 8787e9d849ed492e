use std::sync::Arc;

use anyhow::{Context, Result};
use assistant_core::interaction_log::{LogSink, LoggerOptions};
use assistant_core::tools::{InMemoryReportStore, JsonFileReportStore, ReportStore};
use assistant_core::{
    AudioIo, AudioSignal, HttpFallbackSink, InteractionLogger, NoAudio, NullSink,
    OrchestratorOptions, RestSink, SessionOrchestrator, UiMode, builtin_registry,
};
use assistant_service::audio_adapter::CpalAudio;
use assistant_service::config::Config;
use assistant_service::console::{self, StatusLine};
use clap::Parser;
use gemini_live::utils::{PipelineOptions, device};
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Voice and text assistant on the Gemini Live API")]
struct Cli {
    /// Start in "voice" or "text" mode, overriding ASSISTANT_MODE
    #[arg(long)]
    mode: Option<UiMode>,
    /// Input device name
    #[arg(long)]
    input_device: Option<String>,
    /// Output device name
    #[arg(long)]
    output_device: Option<String>,
    /// Level (0-100) above which a capture frame counts as speech
    #[arg(long)]
    vad_threshold: Option<u8>,
    /// Run without touching audio hardware
    #[arg(long)]
    no_audio: bool,
    /// Print the audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn list_devices() -> Result<()> {
    println!("Input devices:");
    for info in device::available_inputs().context("Failed to list input devices")? {
        println!("{}", info);
    }
    println!("Output devices:");
    for info in device::available_outputs().context("Failed to list output devices")? {
        println!("{}", info);
    }
    Ok(())
}

fn start_logger(config: &Config) -> InteractionLogger {
    let primary: Arc<dyn LogSink> = match &config.interaction_log {
        Some(target) => Arc::new(RestSink::new(&target.url, target.api_key.expose_secret())),
        None => Arc::new(NullSink),
    };
    let fallback: Arc<dyn LogSink> = match &config.interaction_log_fallback {
        Some(url) => Arc::new(HttpFallbackSink::new(url)),
        None => Arc::new(NullSink),
    };
    tracing::info!("Interaction log: primary={}, fallback={}", primary.name(), fallback.name());
    InteractionLogger::start(primary, fallback, LoggerOptions::default())
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Parse Command-Line Arguments ---
    let args = Cli::parse();
    if args.list_devices {
        return list_devices();
    }

    // --- 2. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 3. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting assistant service...");

    // --- 4. Application Setup ---
    let logger = start_logger(&config);

    let mut client_config = gemini_live::Config::builder().with_api_key(config.api_key.expose_secret());
    if let Some(base_url) = &config.base_url {
        client_config = client_config.with_base_url(base_url);
    }
    let client = gemini_live::Client::new(client_config.build());

    let reports: Arc<dyn ReportStore> = match &config.reports_path {
        Some(path) => {
            tracing::info!("Saving reports to {}", path.display());
            Arc::new(JsonFileReportStore::new(path))
        }
        None => Arc::new(InMemoryReportStore::default()),
    };
    let (ui_tx, mut ui_rx) = mpsc::channel(32);
    let tools = builtin_registry(reports, ui_tx);

    let (audio, audio_rx): (Box<dyn AudioIo>, mpsc::Receiver<AudioSignal>) = if args.no_audio {
        tracing::info!("Audio disabled");
        (Box::new(NoAudio), mpsc::channel(1).1)
    } else {
        let (audio, audio_rx) = CpalAudio::new(PipelineOptions {
            input_device: args.input_device.clone(),
            output_device: args.output_device.clone(),
            vad_threshold: args.vad_threshold,
        });
        (Box::new(audio), audio_rx)
    };

    let options = OrchestratorOptions::default()
        .with_model(&config.model)
        .with_mode(args.mode.unwrap_or(config.mode))
        .with_voice_reconnect(config.voice_reconnect)
        .with_user_id(config.user_id.clone());
    let assistant_config = config
        .assistant_config()
        .context("Invalid assistant settings")?;

    let mut orch = SessionOrchestrator::new(
        Arc::new(client),
        audio,
        audio_rx,
        tools,
        logger.clone(),
        assistant_config,
        options,
    );

    if orch.session().ui_mode == UiMode::Text {
        if let Err(e) = orch.connect().await {
            tracing::warn!("Initial connection failed: {:#}", e);
        }
    }

    // --- 5. Main Loop ---
    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status = StatusLine::default();
    let mut printed = 0;

    loop {
        tokio::select! {
            signal = orch.next_signal() => {
                orch.handle_signal(signal).await;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match console::parse(&line) {
                    Ok(command) => match console::execute(&mut orch, command).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => println!("! {:#}", e),
                    },
                    Err(message) => println!("! {}", message),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            },
            Some(command) = ui_rx.recv() => {
                println!("{}", console::show_ui_command(&command));
            }
            _ = tokio::signal::ctrl_c() => break,
        }

        console::print_new_messages(&orch, &mut printed);
        if let Some(line) = status.update(&orch.snapshot()) {
            println!("{}", line);
        }
    }

    // --- 6. Teardown ---
    orch.shutdown().await;
    logger.shutdown().await;
    tracing::info!("Assistant service stopped.");
    Ok(())
}
