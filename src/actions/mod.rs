//! User actions bound to surface controls
//!
//! An action is parsed once from its name and option map into [`Action`].
//! Anything that does not coerce is an [`OptionError`] at load time, never
//! a surprise at press time.

mod executor;
mod options;
mod paths;

pub use executor::{ActionError, ActionExecutor};
pub use options::OptionError;
pub use paths::{PathResolver, Target, X32Paths};

use std::collections::HashMap;
use std::fmt;

use crate::config::ControlMapping;
use crate::osc::OscArg;
use options::{invalid, Options};

/// Mute state requested by a `mute` action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteState {
    On,
    Off,
    Toggle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Move a fader to an absolute level
    FaderSet {
        target: Target,
        level_db: f64,
        fade_ms: u64,
    },
    /// Nudge a fader relative to its current level
    FaderDelta {
        target: Target,
        delta_db: f64,
        fade_ms: u64,
    },
    /// Remember the current level (optionally dipping it) until release
    FaderStore {
        target: Target,
        delta_db: Option<f64>,
        fade_ms: u64,
    },
    /// Return to the level remembered by `FaderStore`
    FaderRestore { target: Target, fade_ms: u64 },
    /// Pan -100 (left) ..= 100 (right)
    PanSet {
        target: Target,
        pan: f64,
        fade_ms: u64,
    },
    Mute { target: Target, state: MuteState },
    /// Raw message
    Send { address: String, args: Vec<OscArg> },
}

impl Action {
    /// Build a typed action from a name and loose options
    pub fn parse(name: &str, options: &serde_json::Value) -> Result<Self, OptionError> {
        let opts = Options::new(options)?;

        let action = match name {
            "fader_set" => Action::FaderSet {
                target: target(&opts)?,
                level_db: opts.number("level_db")?,
                fade_ms: opts.duration_ms("fade_ms")?,
            },
            "fader_delta" => Action::FaderDelta {
                target: target(&opts)?,
                delta_db: opts.number("delta_db")?,
                fade_ms: opts.duration_ms("fade_ms")?,
            },
            "fader_store" => Action::FaderStore {
                target: target(&opts)?,
                delta_db: opts.optional_number("delta_db")?,
                fade_ms: opts.duration_ms("fade_ms")?,
            },
            "fader_restore" => Action::FaderRestore {
                target: target(&opts)?,
                fade_ms: opts.duration_ms("fade_ms")?,
            },
            "pan_set" => {
                let target = target(&opts)?;
                if !target.has_pan() {
                    return Err(OptionError::Invalid {
                        key: "target",
                        expected: "a strip with a pan control",
                        got: target.to_string(),
                    });
                }
                let pan = opts.number("pan")?;
                if !(-100.0..=100.0).contains(&pan) {
                    return Err(invalid(
                        "pan",
                        "between -100 and 100",
                        &serde_json::Value::from(pan),
                    ));
                }
                Action::PanSet {
                    target,
                    pan,
                    fade_ms: opts.duration_ms("fade_ms")?,
                }
            }
            "mute" => Action::Mute {
                target: target(&opts)?,
                state: mute_state(&opts)?,
            },
            "send" => {
                let address = opts.string("address")?;
                if !address.starts_with('/') {
                    return Err(OptionError::Invalid {
                        key: "address",
                        expected: "an address starting with '/'",
                        got: format!("\"{}\"", address),
                    });
                }
                let args = match opts.value("args") {
                    Some(raw) => serde_json::from_value::<Vec<OscArg>>(raw.clone())
                        .map_err(|_| invalid("args", "a list of {kind, value} arguments", raw))?,
                    None => Vec::new(),
                };
                Action::Send { address, args }
            }
            other => return Err(OptionError::UnknownAction(other.to_string())),
        };

        Ok(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::FaderSet { .. } => "fader_set",
            Action::FaderDelta { .. } => "fader_delta",
            Action::FaderStore { .. } => "fader_store",
            Action::FaderRestore { .. } => "fader_restore",
            Action::PanSet { .. } => "pan_set",
            Action::Mute { .. } => "mute",
            Action::Send { .. } => "send",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Send { address, args } => {
                write!(f, "send {} {}", address, crate::osc::format_args(args))
            }
            Action::FaderSet { target, level_db, .. } => {
                write!(f, "fader_set {} {:.1}dB", target, level_db)
            }
            Action::FaderDelta { target, delta_db, .. } => {
                write!(f, "fader_delta {} {:+.1}dB", target, delta_db)
            }
            Action::PanSet { target, pan, .. } => write!(f, "pan_set {} {:.0}", target, pan),
            Action::Mute { target, state } => write!(f, "mute {} {:?}", target, state),
            Action::FaderStore { target, .. } | Action::FaderRestore { target, .. } => {
                write!(f, "{} {}", self.name(), target)
            }
        }
    }
}

fn target(opts: &Options<'_>) -> Result<Target, OptionError> {
    Target::parse(&opts.string("target")?)
}

fn mute_state(opts: &Options<'_>) -> Result<MuteState, OptionError> {
    let Some(raw) = opts.value("state") else {
        return Ok(MuteState::Toggle);
    };
    let state = match raw {
        serde_json::Value::Bool(true) => Some(MuteState::On),
        serde_json::Value::Bool(false) => Some(MuteState::Off),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "on" | "mute" | "muted" | "1" | "true" => Some(MuteState::On),
            "off" | "unmute" | "unmuted" | "0" | "false" => Some(MuteState::Off),
            "toggle" => Some(MuteState::Toggle),
            _ => None,
        },
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(1) => Some(MuteState::On),
            Some(0) => Some(MuteState::Off),
            Some(2) => Some(MuteState::Toggle),
            _ => None,
        },
        _ => None,
    };
    state.ok_or_else(|| invalid("state", "on, off or toggle", raw))
}

/// Press/release actions per surface control
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    controls: HashMap<String, (Action, Option<Action>)>,
}

impl Bindings {
    pub fn from_config(controls: &HashMap<String, ControlMapping>) -> Result<Self, OptionError> {
        let mut parsed = HashMap::with_capacity(controls.len());
        for (control_id, mapping) in controls {
            let press = mapping.press.parse()?;
            let release = mapping.release.as_ref().map(|r| r.parse()).transpose()?;
            parsed.insert(control_id.clone(), (press, release));
        }
        Ok(Self { controls: parsed })
    }

    pub fn press(&self, control_id: &str) -> Option<&Action> {
        self.controls.get(control_id).map(|(press, _)| press)
    }

    pub fn release(&self, control_id: &str) -> Option<&Action> {
        self.controls
            .get(control_id)
            .and_then(|(_, release)| release.as_ref())
    }

    pub fn control_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.controls.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_fader_actions() {
        let action = Action::parse(
            "fader_set",
            &json!({ "target": "/ch/01", "level_db": "-5", "fade_ms": 1000 }),
        )
        .unwrap();
        assert_eq!(
            action,
            Action::FaderSet {
                target: Target::Channel(1),
                level_db: -5.0,
                fade_ms: 1000
            }
        );

        let store = Action::parse("fader_store", &json!({ "target": "/dca/1" })).unwrap();
        assert_eq!(
            store,
            Action::FaderStore {
                target: Target::Dca(1),
                delta_db: None,
                fade_ms: 0
            }
        );
    }

    #[test]
    fn test_invalid_options_fail_fast() {
        assert_eq!(
            Action::parse("fader_set", &json!({ "target": "/ch/01" })),
            Err(OptionError::Missing("level_db"))
        );
        assert!(matches!(
            Action::parse("fader_set", &json!({ "target": "/ch/01", "level_db": "loud" })),
            Err(OptionError::Invalid { key: "level_db", .. })
        ));
        assert!(matches!(
            Action::parse("pan_set", &json!({ "target": "/ch/01", "pan": 150 })),
            Err(OptionError::Invalid { key: "pan", .. })
        ));
        assert!(matches!(
            Action::parse("pan_set", &json!({ "target": "/dca/1", "pan": 0 })),
            Err(OptionError::Invalid { key: "target", .. })
        ));
        assert_eq!(
            Action::parse("explode", &json!({})),
            Err(OptionError::UnknownAction("explode".into()))
        );
    }

    #[test]
    fn test_mute_states() {
        let parse = |state: serde_json::Value| {
            Action::parse("mute", &json!({ "target": "/bus/01", "state": state }))
        };
        assert!(matches!(parse(json!("on")), Ok(Action::Mute { state: MuteState::On, .. })));
        assert!(matches!(parse(json!(false)), Ok(Action::Mute { state: MuteState::Off, .. })));
        assert!(matches!(parse(json!("Toggle")), Ok(Action::Mute { state: MuteState::Toggle, .. })));
        assert!(parse(json!("sideways")).is_err());

        let default = Action::parse("mute", &json!({ "target": "/bus/01" })).unwrap();
        assert!(matches!(default, Action::Mute { state: MuteState::Toggle, .. }));
    }

    #[test]
    fn test_parse_send() {
        let action = Action::parse(
            "send",
            &json!({
                "address": "/ch/01/mix/on",
                "args": [{ "kind": "int", "value": 0 }]
            }),
        )
        .unwrap();
        assert_eq!(
            action,
            Action::Send {
                address: "/ch/01/mix/on".into(),
                args: vec![OscArg::Int(0)]
            }
        );

        assert!(Action::parse("send", &json!({ "address": "ch/01" })).is_err());
        assert!(Action::parse("send", &json!({ "address": "/x", "args": [1, 2] })).is_err());
    }

    #[test]
    fn test_bindings() {
        let yaml = r#"
dip:
  press: { action: fader_store, options: { target: "/ch/02", delta_db: -20 } }
  release: { action: fader_restore, options: { target: "/ch/02" } }
kill:
  press: { action: mute, options: { target: "/main/st", state: "on" } }
"#;
        let controls: HashMap<String, ControlMapping> = serde_yaml::from_str(yaml).unwrap();
        let bindings = Bindings::from_config(&controls).unwrap();

        assert_eq!(bindings.control_ids(), vec!["dip", "kill"]);
        assert_eq!(bindings.press("dip").map(Action::name), Some("fader_store"));
        assert_eq!(bindings.release("dip").map(Action::name), Some("fader_restore"));
        assert!(bindings.release("kill").is_none());
        assert!(bindings.press("missing").is_none());
    }
}
