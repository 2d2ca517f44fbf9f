//! Terminal command handlers.
//!
//! Each stdin line parses into a [`Command`], which [`execute`] runs against
//! the shared [`LiveEngine`].

use std::fmt;
use std::path::Path;

use lingualive_core::{
    audio::device::{list_input_devices, list_output_devices, DeviceInfo},
    LanguagePair, LiveEngine, SUPPORTED_LANGUAGES,
};
use tracing::{info, warn};

use crate::settings::{save_settings, AppSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    End,
    Mute,
    Unmute,
    ToggleMute,
    Language { source: String, target: String },
    Languages,
    Devices,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unknown(String),
    Usage(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty command"),
            ParseError::Unknown(word) => write!(f, "unknown command '{word}', try 'help'"),
            ParseError::Usage(usage) => write!(f, "usage: {usage}"),
        }
    }
}

impl std::str::FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err(ParseError::Empty);
        };
        let rest: Vec<&str> = words.collect();
        let bare = |cmd: Command| {
            if rest.is_empty() {
                Ok(cmd)
            } else {
                Err(ParseError::Usage("commands other than 'lang' take no arguments"))
            }
        };

        match head.to_ascii_lowercase().as_str() {
            "start" | "call" => bare(Command::Start),
            "stop" | "end" | "hangup" => bare(Command::End),
            "mute" => bare(Command::Mute),
            "unmute" => bare(Command::Unmute),
            "toggle" => bare(Command::ToggleMute),
            "lang" => match rest.as_slice() {
                [] => Ok(Command::Languages),
                [source, target] => Ok(Command::Language {
                    source: source.to_string(),
                    target: target.to_string(),
                }),
                _ => Err(ParseError::Usage("lang [<source> <target>]")),
            },
            "devices" => bare(Command::Devices),
            "status" => bare(Command::Status),
            "help" | "?" => bare(Command::Help),
            "quit" | "exit" | "q" => bare(Command::Quit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

pub const HELP: &str = "\
commands:
  start              open devices and connect
  stop               end the call
  mute | unmute      silence or restore the microphone
  toggle             flip mute
  lang               list languages and show the current pair
  lang <src> <dst>   change the pair (only while idle)
  devices            list audio devices
  status             connection state, volume and counters
  quit";

/// Whether the command loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

fn print_devices(label: &str, devices: &[DeviceInfo]) {
    println!("{label}:");
    if devices.is_empty() {
        println!("  (none)");
    }
    for d in devices {
        let mut tags = Vec::new();
        if d.is_default {
            tags.push("default");
        }
        if d.is_recommended {
            tags.push("recommended");
        }
        if tags.is_empty() {
            println!("  {}", d.name);
        } else {
            println!("  {} [{}]", d.name, tags.join(", "));
        }
    }
}

/// Run one command. Engine errors are reported, never fatal.
pub async fn execute(
    engine: &LiveEngine,
    command: Command,
    settings: &mut AppSettings,
    settings_path: &Path,
) -> Flow {
    match command {
        Command::Start => {
            if let Err(e) = engine.start().await {
                println!("start failed: {e}");
            }
        }
        Command::End => engine.end_call().await,
        Command::Mute => report_mute(engine.set_muted(true).await),
        Command::Unmute => report_mute(engine.set_muted(false).await),
        Command::ToggleMute => report_mute(engine.toggle_mute().await),
        Command::Languages => {
            for l in SUPPORTED_LANGUAGES {
                println!("  {} {:<3} {}", l.flag, l.code, l.native_name);
            }
            println!("current: {}", engine.language_pair().label());
        }
        Command::Language { source, target } => {
            let pair = match LanguagePair::from_codes(&source, &target) {
                Ok(pair) => pair,
                Err(e) => {
                    println!("{e}");
                    return Flow::Continue;
                }
            };
            if let Err(e) = engine.set_language_pair(pair) {
                println!("{e}");
                return Flow::Continue;
            }
            settings.languages = pair.into();
            if let Err(e) = save_settings(settings_path, settings) {
                warn!(path = ?settings_path, "failed to persist language pair: {e}");
            }
            info!(pair = %pair.label(), "language pair changed");
            println!("language pair: {}", pair.label());
        }
        Command::Devices => {
            print_devices("inputs", &list_input_devices());
            print_devices("outputs", &list_output_devices());
        }
        Command::Status => {
            let diag = engine.diagnostics();
            println!(
                "state={} muted={} volume={:.3} cursor={:.3}s",
                engine.state(),
                engine.is_muted().await,
                engine.volume(),
                engine.playback_cursor()
            );
            println!(
                "blocks={} sent={} received={} scheduled={} dropped={} sessions={}",
                diag.blocks_captured,
                diag.frames_sent,
                diag.frames_received,
                diag.frames_scheduled,
                diag.frames_dropped,
                diag.sessions_started
            );
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return Flow::Exit,
    }
    Flow::Continue
}

fn report_mute(muted: bool) {
    println!("{}", if muted { "microphone muted" } else { "microphone live" });
}
