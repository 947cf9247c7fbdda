use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voicebox::audio::{AudioBackend, AudioChunk, AudioDeviceManager, CpalBackend, MockBackend, MockSignal};
use voicebox::db::{self, HistoryRepo, UserRepo};
use voicebox::{CommandRouter, Config, Daemon, Language};

/// Voicebox - on-device voice assistant pipeline
#[derive(Parser)]
#[command(name = "voicebox", version, about)]
struct Cli {
    /// Port for the control API
    #[arg(long, env = "VOICEBOX_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use a simulated microphone and speaker (for headless machines)
    #[arg(long, env = "VOICEBOX_MOCK_AUDIO")]
    mock_audio: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the control API and run sessions (default)
    Run {
        /// Start a session for this user right away
        #[arg(short, long)]
        user: Option<String>,
        /// Record immediately instead of waiting for the wake trigger
        #[arg(long, requires = "user")]
        listen_now: bool,
    },
    /// List audio devices
    ListDevices,
    /// Show microphone levels
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Play a test tone
    TestSpeaker,
    /// Register a user or update their settings
    AddUser {
        /// User ID
        user: String,
        /// Language code (uk, en, de)
        #[arg(short, long)]
        language: Option<String>,
        /// Extra personality instructions for the LLM
        #[arg(short, long)]
        personality: Option<String>,
    },
    /// Classify a command without running the pipeline
    Classify {
        /// Command text
        text: String,
        /// Language code
        #[arg(short, long, default_value = "en")]
        language: String,
    },
    /// Show a user's recent commands
    History {
        /// User ID
        user: String,
        /// Number of entries
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,voicebox=info",
        1 => "info,voicebox=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }
    let backend = audio_backend(cli.mock_audio);

    match cli.command.unwrap_or(Command::Run {
        user: None,
        listen_now: false,
    }) {
        Command::Run { user, listen_now } => {
            tracing::info!(
                port = config.api_server.port,
                mock_audio = cli.mock_audio,
                "starting voicebox"
            );
            // Blocking HTTP clients must be built off the async runtime
            let daemon = tokio::task::spawn_blocking(move || Daemon::new(config, backend)).await??;
            daemon.run(user, listen_now).await?;
            Ok(())
        }
        Command::ListDevices => list_devices(backend),
        Command::TestMic { duration } => test_mic(&config, backend, duration),
        Command::TestSpeaker => test_speaker(&config, backend),
        Command::AddUser {
            user,
            language,
            personality,
        } => add_user(&config, &user, language.as_deref(), personality.as_deref()),
        Command::Classify { text, language } => classify(&text, &language),
        Command::History { user, limit } => history(&config, &user, limit),
    }
}

fn audio_backend(mock: bool) -> Arc<dyn AudioBackend> {
    if mock {
        tracing::info!("using simulated audio devices");
        Arc::new(
            MockBackend::new()
                .with_signal(MockSignal::new().silence(3.0).tone(1.0, 3000))
                .realtime(true),
        )
    } else {
        Arc::new(CpalBackend::new())
    }
}

/// List audio devices
fn list_devices(backend: Arc<dyn AudioBackend>) -> anyhow::Result<()> {
    let devices = AudioDeviceManager::new(backend).list_devices()?;
    if devices.is_empty() {
        println!("No audio devices found");
        return Ok(());
    }

    println!("{:>5}  {:>3}  {:>3}  name", "index", "in", "out");
    for device in devices {
        println!(
            "{:>5}  {:>3}  {:>3}  {}",
            device.index, device.max_input_channels, device.max_output_channels, device.name
        );
    }
    Ok(())
}

/// Show microphone levels once per second
fn test_mic(config: &Config, backend: Arc<dyn AudioBackend>, duration: u64) -> anyhow::Result<()> {
    let devices = AudioDeviceManager::new(backend).with_chunk_size(config.audio.chunk_size);
    let mut handle = devices.open_capture(&config.audio.input, &config.audio.capture_rates)?;

    println!("Testing microphone for {duration} seconds...");
    println!("Device: {} at {} Hz", handle.device().name, handle.sample_rate());
    println!("Speak into your microphone!\n---");

    let chunks_per_second = (handle.sample_rate() as usize / handle.chunk_size()).max(1);
    for second in 1..=duration {
        let mut levels = Vec::with_capacity(chunks_per_second);
        let mut peak = 0_i16;
        for _ in 0..chunks_per_second {
            let chunk = devices.read_chunk(&mut handle)?;
            peak = peak.max(chunk.samples().iter().map(|s| s.saturating_abs()).max().unwrap_or(0));
            levels.push(chunk.rms());
        }

        #[allow(clippy::cast_precision_loss)]
        let rms = levels.iter().sum::<f32>() / levels.len() as f32;

        // 50 columns span 0..5000 RMS
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (rms / 100.0).min(50.0) as usize;
        let meter = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{second:2}s] RMS: {rms:7.1} | Peak: {peak:5} | [{meter}]");
    }

    println!("\n---");
    println!("If the meter moved while you spoke, the microphone works.");
    println!("Speech usually sits above {:.0} RMS.", config.recorder.threshold);
    Ok(())
}

/// Play a 440 Hz tone for two seconds
fn test_speaker(config: &Config, backend: Arc<dyn AudioBackend>) -> anyhow::Result<()> {
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let samples: Vec<i16> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * f32::from(i16::MAX)) as i16
        })
        .collect();

    println!("Playing a 440 Hz tone for 2 seconds...");
    let devices = AudioDeviceManager::new(backend);
    devices.play(
        &config.audio.output,
        &config.audio.playback_rates,
        &AudioChunk::new(samples, sample_rate),
    )?;

    println!("If you heard the tone, the speaker works.");
    Ok(())
}

/// Register or update a user
fn add_user(
    config: &Config,
    user_id: &str,
    language: Option<&str>,
    personality: Option<&str>,
) -> anyhow::Result<()> {
    let language = match language {
        Some(code) if Language::is_supported(code) => Language::from_code(code),
        Some(code) => anyhow::bail!("unsupported language: {code} (use uk, en or de)"),
        None => config.default_language,
    };

    let repo = UserRepo::new(db::init(config.db_path())?);
    let user = repo.upsert(user_id, language.code(), personality)?;
    println!(
        "User {} saved ({})",
        user.user_id,
        Language::from_code(&user.language).native_name()
    );
    Ok(())
}

/// Print the intent for a command
fn classify(text: &str, language: &str) -> anyhow::Result<()> {
    let router = CommandRouter::new()?;
    let intent = router.classify(text, language);
    println!("{}", serde_json::to_string_pretty(&intent)?);
    Ok(())
}

/// Print a user's recent commands
fn history(config: &Config, user_id: &str, limit: usize) -> anyhow::Result<()> {
    let repo = HistoryRepo::new(db::init(config.db_path())?);
    let records = repo.list(user_id, limit)?;
    if records.is_empty() {
        println!("No history for user {user_id}");
        return Ok(());
    }

    for record in records {
        println!(
            "{} [{}] {} -> {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.language,
            record.command,
            record.response.as_deref().unwrap_or("(no response)")
        );
    }
    Ok(())
}
