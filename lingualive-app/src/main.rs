// LinguaLive headless host.
//
// Reads commands from stdin and prints connection state and input activity.

mod commands;
mod settings;

use std::sync::Arc;

use anyhow::Context;
use lingualive_core::{
    AudioBackend, ConnectionState, CpalBackend, GeminiLiveConnector, LiveEngine, SessionConnector,
    StubConnector,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::commands::{execute, Command, Flow, HELP};
use crate::settings::{default_settings_path, load_settings};

#[derive(Debug, Default)]
struct Args {
    /// Loop audio through a local echo session instead of the remote service.
    echo: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--echo" => args.echo = true,
            "-h" | "--help" => {
                println!("usage: lingualive [--echo]\n\n{HELP}");
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument '{other}'"),
        }
    }
    Ok(args)
}

fn spawn_state_printer(engine: &LiveEngine) {
    let mut rx = engine.subscribe_state();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.detail {
                    Some(detail) if event.state == ConnectionState::Error => {
                        println!("[{}] {detail}", event.state)
                    }
                    Some(detail) => println!("[{}] ({detail})", event.state),
                    None => println!("[{}]", event.state),
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Prints only activity edges; the per-block level is too chatty for a terminal.
fn spawn_activity_printer(engine: &LiveEngine) {
    let mut rx = engine.subscribe_volume();
    tokio::spawn(async move {
        let mut was_active = false;
        loop {
            match rx.recv().await {
                Ok(event) if event.active != was_active => {
                    was_active = event.active;
                    if was_active {
                        println!("[mic] speaking (level {:.2})", event.level);
                    } else {
                        println!("[mic] quiet");
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lingualive=info")),
        )
        .init();

    let args = parse_args()?;
    info!("LinguaLive starting");

    // ── Settings ──────────────────────────────────────────────────────────
    let settings_path = default_settings_path();
    let mut app_settings = load_settings(&settings_path);
    app_settings.apply_env_overrides(|name| std::env::var(name).ok());
    info!(
        settings_path = ?settings_path,
        pair = %app_settings.language_pair().label(),
        voice = %app_settings.voice_name,
        model = %app_settings.model,
        has_api_key = app_settings.effective_api_key().is_some(),
        echo = args.echo,
        "settings loaded"
    );

    // ── Engine setup ──────────────────────────────────────────────────────
    let mut config = app_settings.engine_config();
    let connector: Arc<dyn SessionConnector> = if args.echo {
        config.api_key.get_or_insert_with(|| "local-echo".to_string());
        Arc::new(StubConnector::echo(config.output_sample_rate))
    } else {
        Arc::new(GeminiLiveConnector::new(
            config.endpoint.clone(),
            config.model.clone(),
        ))
    };
    if config.api_key.is_none() {
        warn!("no API key configured; set GEMINI_API_KEY or add apiKey to the settings file");
    }
    let backend: Arc<dyn AudioBackend> = Arc::new(CpalBackend);
    let engine = LiveEngine::new(config, backend, connector);

    spawn_state_printer(&engine);
    spawn_activity_printer(&engine);
    println!("{HELP}");

    // ── Command loop ──────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(command) => {
                if execute(&engine, command, &mut app_settings, &settings_path).await == Flow::Exit
                {
                    break;
                }
            }
            Err(e) => println!("{e}"),
        }
    }

    engine.end_call().await;
    let diag = engine.diagnostics();
    info!(
        sessions = diag.sessions_started,
        frames_sent = diag.frames_sent,
        frames_scheduled = diag.frames_scheduled,
        frames_dropped = diag.frames_dropped,
        "LinguaLive stopped"
    );
    Ok(())
}
