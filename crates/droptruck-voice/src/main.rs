//! DropTruck voice agent CLI: one booking session over a text transcript.
//!
//! Usage:
//!   cargo run -p droptruck-voice -- [--transcript FILE] [--no-llm]
//!
//! Each input line is delivered as a final transcript fragment. An empty line is
//! silence, `:end` hangs up. Without `--transcript` lines are read from stdin.

use droptruck_voice::{
    AgentConfig, BookingSubmitter, ChannelTranscription, Collaborators, ConversationOrchestrator,
    EchoReplyGenerator, FileSessionSink, HttpBookingSubmitter, LogSynthesizer,
    OpenAiReplyGenerator, ReplyGenerator, SessionClock, SessionState, TranscriptSender,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Extra wait on top of endpointing so a line is segmented before the next one.
const LINE_MARGIN: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[droptruck-voice] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut transcript: Option<PathBuf> = None;
    let mut no_llm = false;
    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        match a.as_str() {
            "--transcript" => transcript = args.next().map(PathBuf::from),
            "--no-llm" => no_llm = true,
            "--help" | "-h" => {
                eprintln!("DropTruck voice agent");
                eprintln!("  --transcript FILE   Read utterances from FILE instead of stdin");
                eprintln!("  --no-llm            Echo replies instead of calling the chat API");
                eprintln!();
                eprintln!("One line per utterance; empty line = silence; ':end' = hang up.");
                eprintln!("Config: DROPTRUCK_CONFIG (default config/agent.toml), DROPTRUCK__* env, OPENAI_API_KEY");
                return Ok(());
            }
            other => warn!("Ignoring unknown argument {}", other),
        }
    }

    let mut config = AgentConfig::load().unwrap_or_else(|e| {
        warn!("Config load failed ({}); using environment defaults", e);
        AgentConfig::from_env()
    });
    if no_llm {
        config.llm_api_key = None;
    }

    let session_id = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let clock = SessionClock::start();
    let (transport, sender, events) =
        ChannelTranscription::new(config.transport_channel_capacity, clock);

    let generator: Arc<dyn ReplyGenerator> = match OpenAiReplyGenerator::from_config(&config) {
        Ok(g) => {
            info!("Reply model: {}", g.model);
            Arc::new(g)
        }
        Err(e) => {
            info!("Echo mode: {}", e);
            Arc::new(EchoReplyGenerator)
        }
    };
    let sink = Arc::new(FileSessionSink::create(&config.logs_dir, &session_id)?);
    let submitter: Arc<dyn BookingSubmitter> = Arc::new(HttpBookingSubmitter::from_config(&config)?);

    let collaborators = Collaborators {
        transport: Arc::new(transport),
        generator,
        synthesizer: Arc::new(LogSynthesizer::new()),
        sink: sink.clone(),
        submitter,
    };

    let (end_tx, end_rx) = watch::channel(false);
    let orchestrator =
        ConversationOrchestrator::new(session_id.clone(), config.clone(), collaborators)
            .with_clock(clock);
    let states = orchestrator.subscribe_state();
    let pacing = config.endpointing() + LINE_MARGIN;

    let feeder = tokio::spawn(async move {
        if let Err(e) = feed_lines(transcript, sender, states, pacing).await {
            warn!("Transcript input failed: {}", e);
        }
        end_tx.send_replace(true);
    });

    let report = orchestrator.run(events, end_rx).await?;
    feeder.abort();

    println!();
    println!("{}", report.booking);
    println!("Ended: {}", report.end_reason);
    match &report.submission {
        Some(outcome) if outcome.is_success() => println!("Backend: booking accepted"),
        Some(outcome) => println!("Backend: booking rejected ({:?})", outcome),
        None => println!("Backend: submission failed"),
    }
    println!("Session log: {}", sink.log_path().display());
    println!("Summary:     {}", sink.summary_path().display());
    Ok(())
}

/// Deliver each line as a final fragment, waiting for the agent to answer before the next.
async fn feed_lines(
    path: Option<PathBuf>,
    sender: TranscriptSender,
    mut states: watch::Receiver<SessionState>,
    pacing: Duration,
) -> anyhow::Result<()> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match path {
        Some(p) => Box::new(BufReader::new(tokio::fs::File::open(p).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == ":end" {
            info!("Hang-up requested");
            break;
        }
        if !line.is_empty() && sender.send_final(line).await.is_err() {
            // Transport stopped: the session is already ending.
            return Ok(());
        }
        tokio::time::sleep(pacing).await;
        states
            .wait_for(|s| {
                matches!(
                    s,
                    SessionState::Listening | SessionState::Confirming | SessionState::Ended
                )
            })
            .await?;
        if *states.borrow() == SessionState::Ended {
            return Ok(());
        }
    }
    Ok(())
}
