use std::env;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use futures_util::StreamExt;
use quiz_participant::config::{ApiUrl, EnvSetting};
use quiz_participant::poller::PollEvent;
use quiz_participant::{ActivationState, ClientConfig, QuizClient, QuizEvent, SessionCode};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(author, version, about = "Join a live quiz session from the terminal", long_about = None)]
#[command(after_help = "ENVIRONMENT VARIABLES:
    QUIZ_API_URL               Base URL of the quiz server API (required unless --api-url)
    QUIZ_POLL_INTERVAL_MS      Activation polling interval [default: 3000]
    QUIZ_QUESTION_DURATION_MS  Time per question [default: 15000]
    QUIZ_ADVANCE_ON_ANSWER     Move on as soon as an answer is sent [default: false]
    QUIZ_MAX_POLL_ERRORS       Stop polling after this many failures in a row
    RUST_LOG                   Log filter, e.g. quiz_participant=debug

EXAMPLES:
    quiz check --code ABCD            # Is the session running?
    quiz check --code ABCD --watch    # Wait until it is
    quiz play --code ABCD --name Ana  # Join and answer with keys 1-9")]
struct Args {
    /// Quiz server base URL, overrides QUIZ_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether a session has been activated
    Check {
        #[arg(short, long)]
        code: String,
        /// Keep polling until the session is active
        #[arg(short, long)]
        watch: bool,
    },
    /// Join a session and answer its questions
    Play {
        #[arg(short, long)]
        code: String,
        #[arg(short, long)]
        name: String,
        /// Advance as soon as the answer was sent instead of waiting for the timer
        #[arg(long)]
        advance_on_answer: bool,
        /// Seconds per question
        #[arg(long)]
        question_secs: Option<u64>,
    },
}

fn load_config(api_url: Option<&str>) -> Result<ClientConfig> {
    let _ = dotenvy::dotenv();
    let config = ClientConfig::from_lookup(|key| match api_url {
        Some(url) if key == ApiUrl::KEY_NAME => Some(url.to_string()),
        _ => env::var(key).ok(),
    })
    .context("could not load quiz client configuration")?;
    Ok(config)
}

/// Print a line that also renders correctly while the terminal is in raw mode.
fn say(line: impl AsRef<str>) {
    let mut out = io::stdout();
    let _ = write!(out, "{}\r\n", line.as_ref());
    let _ = out.flush();
}

#[derive(Debug)]
enum Key {
    Digit(usize),
    Quit,
}

/// Forward single keystrokes until `stop` is set. Raw mode is only held
/// while waiting for a key.
fn read_keys(tx: mpsc::UnboundedSender<Key>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        if terminal::enable_raw_mode().is_err() {
            return;
        }
        let key = match event::poll(Duration::from_millis(200)) {
            Ok(true) => match event::read() {
                Ok(Event::Key(KeyEvent { code, modifiers, kind, .. })) if kind != KeyEventKind::Release => match code {
                    KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => Some(Key::Quit),
                    KeyCode::Char('q') | KeyCode::Esc => Some(Key::Quit),
                    KeyCode::Char(c) => c.to_digit(10).filter(|d| *d > 0).map(|d| Key::Digit(d as usize)),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        };
        let _ = terminal::disable_raw_mode();

        if let Some(key) = key {
            let quit = matches!(key, Key::Quit);
            if tx.send(key).is_err() || quit {
                return;
            }
        }
    }
}

async fn check(client: &QuizClient, code: &str, watch: bool) -> Result<()> {
    let code = SessionCode::new(code)?;
    if !watch {
        match client.check_once(&code).await? {
            ActivationState::Active => say("The quiz is active"),
            _ => say("The quiz is NOT active"),
        }
        return Ok(());
    }

    let (handle, mut events) = client.watch_activation(code);
    say("Waiting for the quiz to start... (Ctrl-C to stop)");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.stop();
                return Ok(());
            }
            event = events.next() => match event {
                Some(PollEvent::Activated(_)) => {
                    say("The quiz is active");
                    return Ok(());
                }
                Some(PollEvent::State(_)) => say("Not active yet"),
                Some(PollEvent::Error(e)) => say(format!("Check failed: {}", e)),
                Some(PollEvent::GaveUp { consecutive_errors }) => {
                    bail!("gave up after {} failed checks", consecutive_errors)
                }
                None => return Ok(()),
            },
        }
    }
}

async fn play(client: &QuizClient, code: &str, name: &str) -> Result<()> {
    let joined = client.join(code, name).await.context("could not join the session")?;
    say(format!("Joined {} as participant {}", joined.code, joined.participant.id));

    let (session, mut events) = client.start_quiz(&joined);
    let (key_tx, mut keys) = mpsc::unbounded_channel();
    let stop_keys = Arc::new(AtomicBool::new(false));
    let reader = {
        let stop = stop_keys.clone();
        tokio::task::spawn_blocking(move || read_keys(key_tx, stop))
    };

    let mut options: Vec<i64> = Vec::new();
    loop {
        tokio::select! {
            key = keys.recv() => match key {
                Some(Key::Digit(n)) => match options.get(n - 1) {
                    Some(option_id) if !session.is_busy() => {
                        session.select(*option_id);
                    }
                    Some(_) => say("Still sending your answer..."),
                    None => {}
                },
                Some(Key::Quit) | None => {
                    say("Leaving the quiz");
                    break;
                }
            },
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    QuizEvent::Activation(ActivationState::Active) => say("The quiz has started!"),
                    QuizEvent::Activation(_) => say("Waiting for the quiz to start..."),
                    QuizEvent::PollFailed(e) => say(format!("Could not check the quiz state: {}", e)),
                    QuizEvent::PollingAbandoned { .. } => {
                        say("Giving up waiting for the quiz");
                        break;
                    }
                    QuizEvent::QuestionsLoaded { count } => say(format!("{} questions", count)),
                    QuizEvent::LoadFailed(e) => {
                        say(format!("Could not load the questions: {}. Retrying...", e));
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        session.retry();
                    }
                    QuizEvent::Presenting { index, total, question, duration } => {
                        say("");
                        say(format!("[{}/{}] {} ({}s)", index + 1, total, question.text, duration.as_secs()));
                        for (i, option) in question.options.iter().enumerate() {
                            say(format!("  {}) {}", i + 1, option.content));
                        }
                        options = question.options.iter().map(|o| o.id).collect();
                    }
                    QuizEvent::AnswerLocked { .. } => say("Answer locked in"),
                    QuizEvent::AnswerRejected { error, .. } => say(format!("{}", error)),
                    QuizEvent::AnswerAcknowledged { .. } => say("Answer received"),
                    QuizEvent::AnswerFailed { error, .. } => say(format!("{}", error)),
                    QuizEvent::TimeUp { .. } => say("Time is up"),
                    QuizEvent::Completed { answered, total } => {
                        say(format!("You finished the quiz! Answered {} of {}", answered, total));
                    }
                }
            }
        }
    }

    stop_keys.store(true, Ordering::SeqCst);
    session.shutdown().await;
    let _ = reader.await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut config = load_config(args.api_url.as_deref())?;

    match args.command {
        Command::Check { code, watch } => {
            let client = QuizClient::http(config)?;
            check(&client, &code, watch).await
        }
        Command::Play { code, name, advance_on_answer, question_secs } => {
            if advance_on_answer {
                config = config.with_advance_on_answer(true);
            }
            if let Some(secs) = question_secs.filter(|s| *s > 0) {
                config = config.with_question_duration(Duration::from_secs(secs));
            }
            let client = QuizClient::http(config)?;
            play(&client, &code, &name).await
        }
    }
}
