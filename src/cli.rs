//! Command-line interface and REPL
//!
//! Pokes at a running bridge by hand: read the cache, trigger loads, fire
//! bound controls and start fades.

use std::sync::Arc;

use anyhow::Result;
use colored::*;
use parking_lot::RwLock;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::actions::{Action, ActionExecutor, Bindings, PathResolver, Target, X32Paths};
use crate::bridge::BridgeHandle;
use crate::levels::{float_to_db, float_to_pan};
use crate::osc::{format_args, OscArg};
use crate::session::SessionHandle;
use crate::state::{FeedbackId, FeedbackKind};
use crate::transitions::{ValueEncoding, MAX_FADE_MS};

const HELP: &str = "\
get <address>                      show the cached value
load <address>                     fetch a value from the console
strip <target>                     load and show a strip (e.g. /ch/01, /dca/2)
set <address> <value>              write a float
send <address> [args...]           write raw arguments (1 = int, 1.0 = float, else string)
fade <address> <to> <ms> [db|lin]  fade to a level (default dB)
sub <address> <id> <kind>          subscribe a feedback and load its value
unsub <address> <id>               drop a subscription
press <control> / release <control>
stop                               stop all fades
status | stats | controls | help | exit";

/// One parsed REPL line
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Get(String),
    Load(String),
    Strip(Target),
    Set { address: String, value: f32 },
    Send { address: String, args: Vec<OscArg> },
    Fade {
        address: String,
        to: f64,
        duration_ms: u64,
        encoding: ValueEncoding,
    },
    Subscribe {
        address: String,
        id: FeedbackId,
        kind: FeedbackKind,
    },
    Unsubscribe { address: String, id: FeedbackId },
    Press(String),
    Release(String),
    Stop,
    Status,
    Stats,
    Controls,
    Help,
    Exit,
}

impl ReplCommand {
    /// Parse a line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, rest)) = words.split_first() else {
            return Ok(None);
        };

        let address = |i: usize| -> Result<String, String> {
            let a = rest.get(i).ok_or("missing address")?;
            if !a.starts_with('/') {
                return Err(format!("'{}' is not an address", a));
            }
            Ok(a.to_string())
        };
        let word = |i: usize, what: &str| -> Result<String, String> {
            rest.get(i)
                .map(|w| w.to_string())
                .ok_or_else(|| format!("missing {}", what))
        };

        let command = match verb {
            "get" => ReplCommand::Get(address(0)?),
            "load" => ReplCommand::Load(address(0)?),
            "strip" => ReplCommand::Strip(
                Target::parse(&word(0, "strip")?).map_err(|e| e.to_string())?,
            ),
            "set" => {
                let value = finite(&word(1, "value")?, "value")? as f32;
                if !value.is_finite() {
                    return Err("value is out of range for a wire float".to_string());
                }
                ReplCommand::Set {
                    address: address(0)?,
                    value,
                }
            }
            "send" => ReplCommand::Send {
                address: address(0)?,
                args: rest.iter().skip(1).map(|w| parse_arg(w)).collect(),
            },
            "fade" => {
                let encoding = match rest.get(3).copied() {
                    None | Some("db") => ValueEncoding::Decibel,
                    Some("lin") | Some("linear") => ValueEncoding::Linear,
                    Some(other) => return Err(format!("unknown encoding '{}'", other)),
                };
                ReplCommand::Fade {
                    address: address(0)?,
                    to: finite(&word(1, "target level")?, "target level")?,
                    duration_ms: fade_duration(&word(2, "duration")?)?,
                    encoding,
                }
            }
            "sub" => ReplCommand::Subscribe {
                address: address(0)?,
                id: FeedbackId::new(word(1, "feedback id")?),
                kind: FeedbackKind::new(word(2, "feedback kind")?),
            },
            "unsub" => ReplCommand::Unsubscribe {
                address: address(0)?,
                id: FeedbackId::new(word(1, "feedback id")?),
            },
            "press" => ReplCommand::Press(word(0, "control id")?),
            "release" => ReplCommand::Release(word(0, "control id")?),
            "stop" => ReplCommand::Stop,
            "status" => ReplCommand::Status,
            "stats" => ReplCommand::Stats,
            "controls" => ReplCommand::Controls,
            "help" | "?" => ReplCommand::Help,
            "exit" | "quit" => ReplCommand::Exit,
            other => return Err(format!("unknown command '{}' (try 'help')", other)),
        };
        Ok(Some(command))
    }
}

fn finite(word: &str, what: &str) -> Result<f64, String> {
    match word.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(format!("{} must be a finite number", what)),
    }
}

fn fade_duration(word: &str) -> Result<u64, String> {
    match word.parse::<u64>() {
        Ok(ms) if ms <= MAX_FADE_MS => Ok(ms),
        _ => Err(format!(
            "duration must be whole milliseconds, at most {}",
            MAX_FADE_MS
        )),
    }
}

/// Strip parameters the `strip` command shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StripParam {
    Name,
    Level,
    On,
    Pan,
}

impl StripParam {
    fn label(self) -> &'static str {
        match self {
            StripParam::Name => "name",
            StripParam::Level => "level",
            StripParam::On => "on",
            StripParam::Pan => "pan",
        }
    }

    /// Value in operator units; anything unexpected is shown raw
    fn format(self, args: &[OscArg]) -> String {
        if let (StripParam::Name, Some(OscArg::String(name))) = (self, args.first()) {
            return format!("{:?}", name);
        }
        let raw = args.first().and_then(OscArg::as_f32);
        match (self, raw) {
            (StripParam::On, Some(on)) if on >= 0.5 => "on".to_string(),
            (StripParam::On, Some(_)) => "muted".to_string(),
            (StripParam::Level, Some(f)) => {
                let db = float_to_db(f);
                if db.is_finite() {
                    format!("{:+.1} dB", db)
                } else {
                    "-inf dB".to_string()
                }
            }
            (StripParam::Pan, Some(f)) => match float_to_pan(f).round() as i32 {
                0 => "C".to_string(),
                p if p < 0 => format!("L{}", -p),
                p => format!("R{}", p),
            },
            _ => format_args(args),
        }
    }
}

fn strip_params(paths: &impl PathResolver, target: &Target) -> Vec<(StripParam, String)> {
    let mut params = vec![
        (StripParam::Name, paths.name(target)),
        (StripParam::Level, paths.level(target)),
        (StripParam::On, paths.mute(target)),
    ];
    if let Some(pan) = paths.pan(target) {
        params.push((StripParam::Pan, pan));
    }
    params
}

fn parse_arg(word: &str) -> OscArg {
    if let Ok(i) = word.parse::<i32>() {
        return OscArg::Int(i);
    }
    match word.parse::<f32>() {
        Ok(f) if f.is_finite() => OscArg::Float(f),
        _ => OscArg::String(word.to_string()),
    }
}

/// Run the REPL until `exit` or end of input
pub async fn run_repl(bridge: BridgeHandle, bindings: Arc<RwLock<Bindings>>) -> Result<()> {
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

    // rustyline blocks; keep it off the runtime so it can't stall shutdown
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                warn!("Failed to start line editor: {}", e);
                return;
            }
        };
        read_lines(&mut rl, &line_tx);
    });

    println!("{}", "Type 'help' for commands".dimmed());

    while let Some(line) = line_rx.recv().await {
        match ReplCommand::parse(&line) {
            Ok(None) => {}
            Ok(Some(ReplCommand::Exit)) => break,
            Ok(Some(command)) => execute(&bridge, &bindings, command).await,
            Err(e) => println!("{} {}", "error:".red(), e),
        }
    }

    Ok(())
}

fn read_lines(rl: &mut DefaultEditor, line_tx: &mpsc::UnboundedSender<String>) {
    loop {
        match rl.readline("x32> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                if line_tx.send(line).is_err() {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                debug!("Readline error: {}", e);
                break;
            }
        }
    }
}

async fn execute(bridge: &BridgeHandle, bindings: &RwLock<Bindings>, command: ReplCommand) {
    match command {
        ReplCommand::Help => {
            println!("{}", HELP);
            return;
        }
        ReplCommand::Status => {
            println!("Console: {}", bridge.status().to_string().bright_white());
            return;
        }
        ReplCommand::Controls => {
            let bindings = bindings.read();
            if bindings.is_empty() {
                println!("  {}", "No controls configured".dimmed());
            }
            for id in bindings.control_ids() {
                let press = bindings.press(id).map(|a| a.to_string()).unwrap_or_default();
                match bindings.release(id) {
                    Some(release) => println!("  {} {} / {}", id.yellow(), press, release),
                    None => println!("  {} {}", id.yellow(), press),
                }
            }
            return;
        }
        _ => {}
    }

    let Some(session) = bridge.session().filter(SessionHandle::is_alive) else {
        println!("{}", "No live session".red());
        return;
    };

    match command {
        ReplCommand::Get(address) => match session.get(&address).await {
            Some(args) => println!("{} {}", address.cyan(), format_args(&args)),
            None => println!("{} {}", address.cyan(), "unknown".dimmed()),
        },
        ReplCommand::Load(address) => {
            let outcome = session.ensure_loaded(&address).await;
            println!("{} {:?}", address.cyan(), outcome);
        }
        ReplCommand::Strip(target) => {
            println!("{}", target.to_string().bright_white());
            for (param, address) in strip_params(&X32Paths, &target) {
                session.ensure_loaded(&address).await;
                let value = match session.get(&address).await {
                    Some(args) => param.format(&args),
                    None => "unknown".dimmed().to_string(),
                };
                println!("  {:<6} {}", param.label().cyan(), value);
            }
        }
        ReplCommand::Set { address, value } => session.send(address, vec![OscArg::Float(value)]),
        ReplCommand::Send { address, args } => session.send(address, args),
        ReplCommand::Fade {
            address,
            to,
            duration_ms,
            encoding,
        } => session.fade(address, None, to, duration_ms, encoding),
        ReplCommand::Subscribe { address, id, kind } => {
            let outcome = session.subscribe_and_load(&address, id, kind).await;
            println!("{} {:?}", address.cyan(), outcome);
        }
        ReplCommand::Unsubscribe { address, id } => session.unsubscribe(address, id),
        ReplCommand::Press(control) => {
            let action = bindings.read().press(&control).cloned();
            fire(session, &control, action).await;
        }
        ReplCommand::Release(control) => {
            let action = bindings.read().release(&control).cloned();
            fire(session, &control, action).await;
        }
        ReplCommand::Stop => session.stop_all_transitions(),
        ReplCommand::Stats => match session.stats().await {
            Some(stats) => println!("{:#?}", stats),
            None => println!("{}", "No live session".red()),
        },
        ReplCommand::Help | ReplCommand::Status | ReplCommand::Controls | ReplCommand::Exit => {}
    }
}

async fn fire(session: SessionHandle, control: &str, action: Option<Action>) {
    let Some(action) = action else {
        println!("{} {}", "No binding for".red(), control);
        return;
    };
    if let Err(e) = ActionExecutor::new(session).execute(control, &action).await {
        println!("{} {}", "error:".red(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lines() {
        assert_eq!(ReplCommand::parse("   "), Ok(None));
        assert_eq!(
            ReplCommand::parse("get /ch/01/mix/fader"),
            Ok(Some(ReplCommand::Get("/ch/01/mix/fader".into())))
        );
        assert_eq!(
            ReplCommand::parse("set /ch/01/mix/fader 0.5"),
            Ok(Some(ReplCommand::Set {
                address: "/ch/01/mix/fader".into(),
                value: 0.5
            }))
        );
        assert_eq!(
            ReplCommand::parse("fade /dca/1/fader -10 2000"),
            Ok(Some(ReplCommand::Fade {
                address: "/dca/1/fader".into(),
                to: -10.0,
                duration_ms: 2000,
                encoding: ValueEncoding::Decibel
            }))
        );
        assert_eq!(
            ReplCommand::parse("sub /ch/02/mix/on m1 mute"),
            Ok(Some(ReplCommand::Subscribe {
                address: "/ch/02/mix/on".into(),
                id: FeedbackId::new("m1"),
                kind: FeedbackKind::new("mute")
            }))
        );
        assert_eq!(ReplCommand::parse("quit"), Ok(Some(ReplCommand::Exit)));
    }

    #[test]
    fn test_parse_send_args() {
        assert_eq!(
            ReplCommand::parse("send /ch/01/config/name 1 0.5 Vox"),
            Ok(Some(ReplCommand::Send {
                address: "/ch/01/config/name".into(),
                args: vec![
                    OscArg::Int(1),
                    OscArg::Float(0.5),
                    OscArg::String("Vox".into())
                ]
            }))
        );
        assert_eq!(
            ReplCommand::parse("send /x nan"),
            Ok(Some(ReplCommand::Send {
                address: "/x".into(),
                args: vec![OscArg::String("nan".into())]
            }))
        );
    }

    #[test]
    fn test_strip_view() {
        assert_eq!(
            ReplCommand::parse("strip /ch/05"),
            Ok(Some(ReplCommand::Strip(Target::Channel(5))))
        );
        assert!(ReplCommand::parse("strip /ch/40").is_err());
        assert!(ReplCommand::parse("strip").is_err());

        let params = strip_params(&X32Paths, &Target::Channel(5));
        assert_eq!(
            params,
            vec![
                (StripParam::Name, "/ch/05/config/name".to_string()),
                (StripParam::Level, "/ch/05/mix/fader".to_string()),
                (StripParam::On, "/ch/05/mix/on".to_string()),
                (StripParam::Pan, "/ch/05/mix/pan".to_string()),
            ]
        );
        // DCAs have no pan
        assert_eq!(strip_params(&X32Paths, &Target::Dca(2)).len(), 3);

        assert_eq!(StripParam::Level.format(&[OscArg::Float(0.75)]), "+0.0 dB");
        assert_eq!(StripParam::Level.format(&[OscArg::Float(0.0)]), "-inf dB");
        assert_eq!(StripParam::Pan.format(&[OscArg::Float(0.5)]), "C");
        assert_eq!(StripParam::Pan.format(&[OscArg::Float(0.25)]), "L50");
        assert_eq!(StripParam::Pan.format(&[OscArg::Float(1.0)]), "R100");
        assert_eq!(
            StripParam::Name.format(&[OscArg::String("Vox".into())]),
            "\"Vox\""
        );
        assert_eq!(StripParam::On.format(&[OscArg::Int(1)]), "on");
        assert_eq!(StripParam::On.format(&[OscArg::Int(0)]), "muted");
        assert_eq!(StripParam::On.format(&[]), "(query)");
    }

    #[test]
    fn test_parse_errors() {
        assert!(ReplCommand::parse("get ch/01").is_err());
        assert!(ReplCommand::parse("set /ch/01/mix/fader loud").is_err());
        assert!(ReplCommand::parse("fade /dca/1/fader 0 100 cubic").is_err());
        assert!(ReplCommand::parse("press").is_err());
        assert!(ReplCommand::parse("set /ch/01/mix/fader nan").is_err());
        assert!(ReplCommand::parse("set /ch/01/mix/fader inf").is_err());
        assert!(ReplCommand::parse("set /ch/01/mix/fader 1e300").is_err());
        assert!(ReplCommand::parse("fade /ch/01/mix/pan NaN 100 lin").is_err());
        assert!(ReplCommand::parse("fade /dca/1/fader -inf 100").is_err());
        assert!(ReplCommand::parse("fade /dca/1/fader 0 18446744073709551615").is_err());
        assert!(ReplCommand::parse("fade /dca/1/fader 0 600001").is_err());
        assert!(ReplCommand::parse("fade /dca/1/fader 0 600000").is_ok());
        assert!(ReplCommand::parse("dance").is_err());
    }
}
