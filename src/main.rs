use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dialoguer::{Input as Prompt, Password, Select};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use vidya_assist::assistant::{ConsoleStatus, Input, NO_RESULT_MESSAGE, QueryTasks};
use vidya_assist::books::{self, Book};
use vidya_assist::voice::{
    AudioPlayback, AudioSink, CpalMicrophone, Microphone, RecordingSession, SilentOutput,
    Synthesizer,
};
use vidya_assist::{Assistant, Backend, Config, HttpBackend, QueryOutcome, UserProfile};

/// Vidya - voice assistant for NCERT science textbooks
#[derive(Parser)]
#[command(name = "vidya", version, about)]
struct Cli {
    /// Backend API base URL (overrides config and `VIDYA_API_URL`)
    #[arg(long)]
    api_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable audio output (answers are still shown as text)
    #[arg(long, env = "VIDYA_NO_VOICE")]
    no_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account
    Register {
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Login email
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign in
    Login {
        /// Login email
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List available books
    Books,
    /// List chat sessions for a book
    Sessions {
        /// Book id (e.g., class9)
        #[arg(short, long)]
        book: String,
    },
    /// Ask one question and speak the answer
    Ask {
        /// Book id (e.g., class9)
        #[arg(short, long)]
        book: String,
        /// The question
        question: String,
    },
    /// Interactive voice and text chat (default)
    Chat {
        /// Book id; prompts when omitted
        #[arg(short, long)]
        book: Option<String>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the recording as a WAV file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test backend text-to-speech
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,vidya_assist=info",
        1 => "info,vidya_assist=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url.trim_end_matches('/').to_string();
        config.validate()?;
    }
    if cli.no_voice {
        config.voice.enabled = false;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Chat { book: None }) {
        Command::Register { name, email } => register(&config, name, email).await,
        Command::Login { email } => login(&config, email).await,
        Command::Logout => logout(&config).await,
        Command::Whoami => whoami(&config).await,
        Command::Books => {
            list_books();
            Ok(())
        }
        Command::Sessions { book } => sessions(&config, &book).await,
        Command::Ask { book, question } => ask(&config, &book, &question).await,
        Command::Chat { book } => chat(&config, book.as_deref()).await,
        Command::TestMic { duration, save } => test_mic(&config, duration, save).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

/// Build an assistant talking to the configured backend
fn build_assistant(config: &Config) -> Assistant {
    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(&config.api_base_url));

    let output: Arc<dyn AudioSink> = if config.voice.enabled {
        match AudioPlayback::new() {
            Ok(playback) => Arc::new(playback),
            Err(e) => {
                tracing::warn!(error = %e, "no audio output, continuing without voice");
                Arc::new(SilentOutput)
            }
        }
    } else {
        Arc::new(SilentOutput)
    };

    let mut config = config.clone();
    config.voice.announce_status &= config.voice.enabled;

    Assistant::new(&config, backend, output, Box::new(ConsoleStatus))
}

async fn require_login(assistant: &Assistant) -> anyhow::Result<UserProfile> {
    assistant
        .restore_session()
        .await
        .ok_or_else(|| anyhow::anyhow!("not logged in; run `vidya login` first"))
}

fn find_book(key: &str) -> anyhow::Result<&'static Book> {
    books::find(key).ok_or_else(|| {
        let ids: Vec<_> = books::CATALOG.iter().map(|b| b.id).collect();
        anyhow::anyhow!("unknown book '{key}'; choose one of: {}", ids.join(", "))
    })
}

fn prompt_book() -> anyhow::Result<&'static Book> {
    let titles: Vec<_> = books::CATALOG.iter().map(|b| b.title).collect();
    let index = Select::new()
        .with_prompt("Select your class")
        .items(&titles)
        .default(0)
        .interact()?;
    books::CATALOG
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("no book selected"))
}

fn prompt_text(prompt: &str, value: Option<String>) -> anyhow::Result<String> {
    match value {
        Some(value) => Ok(value),
        None => Ok(Prompt::<String>::new().with_prompt(prompt).interact_text()?),
    }
}

/// Create an account
async fn register(
    config: &Config,
    name: Option<String>,
    email: Option<String>,
) -> anyhow::Result<()> {
    let name = prompt_text("Name", name)?;
    let email = prompt_text("Email", email)?;
    let password = Password::new()
        .with_prompt("Password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()?;

    let assistant = build_assistant(config);
    let user = assistant.register(&name, &email, &password).await?;
    println!("Welcome, {}!", user.name);
    Ok(())
}

/// Sign in
async fn login(config: &Config, email: Option<String>) -> anyhow::Result<()> {
    let email = prompt_text("Email", email)?;
    let password = Password::new().with_prompt("Password").interact()?;

    let assistant = build_assistant(config);
    let user = assistant.login(&email, &password).await?;
    println!("Welcome back, {}!", user.name);
    Ok(())
}

/// Sign out
async fn logout(config: &Config) -> anyhow::Result<()> {
    let assistant = build_assistant(config);
    if assistant.restore_session().await.is_none() {
        println!("Not logged in");
        return Ok(());
    }

    assistant.logout().await;
    assistant.speech().wait_until_idle().await;
    Ok(())
}

/// Show the signed-in user
async fn whoami(config: &Config) -> anyhow::Result<()> {
    let assistant = build_assistant(config);
    match assistant.restore_session().await {
        Some(user) => println!("{} <{}>", user.name, user.email),
        None => println!("Not logged in"),
    }
    Ok(())
}

/// List the book catalog
fn list_books() {
    for book in books::CATALOG {
        println!("{:<8} {} ({})", book.id, book.title, book.file);
    }
}

/// List chat sessions for a book
async fn sessions(config: &Config, book: &str) -> anyhow::Result<()> {
    let book = find_book(book)?;
    let assistant = build_assistant(config);
    require_login(&assistant).await?;
    assistant.select_book(book).await?;
    print_sessions(&assistant).await;
    Ok(())
}

async fn print_sessions(assistant: &Assistant) {
    match assistant.list_sessions().await {
        Ok(sessions) if sessions.is_empty() => {
            println!("No chat sessions yet. Type /new to start one!");
        }
        Ok(sessions) => {
            let active = assistant.session_id().await;
            for session in sessions {
                let marker = if active.as_deref() == Some(session.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} [{}] {}", session.id, session.describe());
            }
        }
        Err(e) => println!("Could not load chat sessions: {e}"),
    }
}

async fn print_history(assistant: &Assistant) {
    for message in assistant.history().await {
        println!("{}: {}", message.speaker(), message.text);
        if let Some(source) = &message.source {
            println!("    {source}");
        }
    }
    println!("({})", assistant.message_count_label().await);
}

fn print_outcome(outcome: &QueryOutcome) {
    match outcome {
        QueryOutcome::Answered { response, source } => {
            println!("\nAssistant: {response}");
            if let Some(source) = source {
                println!("    {source}");
            }
            println!();
        }
        QueryOutcome::NoResults => println!("\nAssistant: {NO_RESULT_MESSAGE}\n"),
        _ => {}
    }
}

/// Ask a single question and wait for the answer to be spoken
async fn ask(config: &Config, book: &str, question: &str) -> anyhow::Result<()> {
    let book = find_book(book)?;
    let assistant = build_assistant(config);
    require_login(&assistant).await?;
    assistant.select_book(book).await?;

    let outcome = assistant.submit_text(question).await;
    print_outcome(&outcome);
    assistant.speech().wait_until_idle().await;

    if outcome == QueryOutcome::Failed {
        anyhow::bail!("could not answer the question");
    }
    Ok(())
}

/// Interactive chat: Enter toggles recording, text asks, `/` runs commands
#[allow(clippy::future_not_send)]
async fn chat(config: &Config, book: Option<&str>) -> anyhow::Result<()> {
    let assistant = build_assistant(config);
    let user = require_login(&assistant).await?;

    let book = match book {
        Some(key) => find_book(key)?,
        None => prompt_book()?,
    };
    assistant.select_book(book).await?;

    println!("\n{} | {}", book.title, user.name);
    if assistant.session_id().await.is_some() {
        print_history(&assistant).await;
    }
    println!("Press Enter to start or stop recording, type a question, or /help.\n");

    let microphone = CpalMicrophone::new();
    let mut recording = RecordingSession::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(config.voice.chunk_interval_ms));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut queries = QueryTasks::new();

    let result = loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e.into()),
                };
                let input = Input::parse(&line);
                if !handle_input(&assistant, &microphone, &mut recording, &mut queries, input).await {
                    break Ok(());
                }
            }
            Some(outcome) = queries.next_finished() => print_outcome(&outcome),
            _ = ticker.tick(), if recording.is_capturing() => {
                recording.poll();
            }
        }
    };

    drop(recording);
    for outcome in queries.finish(&assistant).await {
        print_outcome(&outcome);
    }
    assistant.leave_book().await;
    result
}

/// Handle one line of chat input; returns false to leave chat
#[allow(clippy::future_not_send)]
async fn handle_input(
    assistant: &Assistant,
    microphone: &dyn Microphone,
    recording: &mut RecordingSession,
    queries: &mut QueryTasks,
    input: Input,
) -> bool {
    match input {
        Input::ToggleRecording => {
            if let Some(question) = assistant.toggle_recording(recording, microphone) {
                tracing::debug!(
                    seconds = question.clip().duration_secs(),
                    bytes = question.clip().data().len(),
                    "recording captured"
                );
                queries.process(assistant, question);
            }
        }
        Input::Question(text) => queries.ask(assistant, text),
        Input::NewChat => {
            if let Err(e) = assistant.new_session().await {
                tracing::debug!(error = %e, "new chat failed");
            }
        }
        Input::ClearChat => {
            if let Err(e) = assistant.clear_session().await {
                tracing::debug!(error = %e, "clear chat failed");
            }
        }
        Input::Repeat => {
            assistant.repeat_last_response().await;
        }
        Input::Rate(rate) => {
            assistant.set_speech_rate(rate);
        }
        Input::Sessions => print_sessions(assistant).await,
        Input::Load(id) => match assistant.load_session(&id).await {
            Ok(_) => print_history(assistant).await,
            Err(e) => assistant.announce(&format!("Could not load chat {id}: {e}"), false),
        },
        Input::Help => assistant.announce_help(),
        Input::Quit => return false,
        Input::Invalid(message) => assistant.announce(&message, false),
    }
    true
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64, save: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let microphone = CpalMicrophone::new();
    let mut recording = RecordingSession::new();
    recording.start(&microphone)?;

    let interval = Duration::from_millis(config.voice.chunk_interval_ms);
    let ticks = duration.saturating_mul(1000) / config.voice.chunk_interval_ms;
    for _ in 0..ticks {
        tokio::time::sleep(interval).await;
        recording.poll();
    }

    recording.stop()?;
    let clip = recording.finish()?;

    let samples = clip.samples();
    let peak = clip.peak_amplitude();
    let rms = calculate_rms(&samples);

    println!("Captured {:.1}s at {} Hz", clip.duration_secs(), clip.sample_rate());
    println!("RMS: {rms:.4} | Peak: {peak:.4}");

    if peak < config.voice.min_amplitude {
        println!("\nThe recording is below the speech threshold ({}).", config.voice.min_amplitude);
        println!("If you spoke, check:");
        println!("  1. Is your mic plugged in?");
        println!("  2. Run: pactl info | grep 'Default Source'");
        println!("  3. Try: pavucontrol (to check levels)");
    } else {
        println!("\nYour mic is working!");
    }

    if let Some(path) = save {
        std::fs::write(&path, clip.to_wav()?)?;
        println!("Saved recording to {}", path.display());
    }

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let sample_rate = 24000_i32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    playback.play_samples(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test backend text-to-speech
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let backend = HttpBackend::new(&config.api_base_url);

    println!("Synthesizing speech via {}...", backend.base_url());
    let audio = backend.synthesize(text).await?;
    println!("Got {} bytes of audio data", audio.len());

    println!("Playing audio at rate {:.1}...", config.voice.speech_rate);
    let playback = AudioPlayback::new()?;
    playback.play(audio, config.voice.speech_rate).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
