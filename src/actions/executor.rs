//! Runs typed actions against a session

use thiserror::Error;
use tracing::{debug, warn};

use super::paths::{PathResolver, Target, X32Paths};
use super::{Action, MuteState};
use crate::levels;
use crate::load::LoadOutcome;
use crate::osc::OscArg;
use crate::session::SessionHandle;
use crate::state::stash_key;
use crate::transitions::ValueEncoding;

#[derive(Debug, Error, PartialEq)]
pub enum ActionError {
    #[error("{target} has no {what} control")]
    NoPath { target: Target, what: &'static str },
}

/// Executes actions for surface controls
pub struct ActionExecutor<R = X32Paths> {
    session: SessionHandle,
    paths: R,
}

impl ActionExecutor<X32Paths> {
    pub fn new(session: SessionHandle) -> Self {
        Self::with_paths(session, X32Paths)
    }
}

impl<R: PathResolver> ActionExecutor<R> {
    pub fn with_paths(session: SessionHandle, paths: R) -> Self {
        Self { session, paths }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Run `action` on behalf of `control_id`. The id only matters for the
    /// store/restore pair, which shares a stash slot per control.
    pub async fn execute(&self, control_id: &str, action: &Action) -> Result<(), ActionError> {
        debug!(control = control_id, action = %action, "Executing action");

        match action {
            Action::FaderSet {
                target,
                level_db,
                fade_ms,
            } => {
                let address = self.paths.level(target);
                self.session.fade(
                    address,
                    None,
                    levels::clamp_db(*level_db),
                    *fade_ms,
                    ValueEncoding::Decibel,
                );
            }

            Action::FaderDelta {
                target,
                delta_db,
                fade_ms,
            } => {
                let address = self.paths.level(target);
                match self.current_db(&address).await {
                    Some(current) => self.session.fade(
                        address,
                        Some(current),
                        levels::clamp_db(current + delta_db),
                        *fade_ms,
                        ValueEncoding::Decibel,
                    ),
                    None => warn!(address = %address, "Level unknown, delta ignored"),
                }
            }

            Action::FaderStore {
                target,
                delta_db,
                fade_ms,
            } => {
                let address = self.paths.level(target);
                let Some(current) = self.current_db(&address).await else {
                    warn!(address = %address, "Level unknown, nothing stored");
                    return Ok(());
                };
                self.session
                    .stash_store(stash_key(control_id, &address), current);
                if let Some(delta) = delta_db {
                    self.session.fade(
                        address,
                        Some(current),
                        levels::clamp_db(current + delta),
                        *fade_ms,
                        ValueEncoding::Decibel,
                    );
                }
            }

            Action::FaderRestore { target, fade_ms } => {
                let address = self.paths.level(target);
                match self.session.stash_take(&stash_key(control_id, &address)).await {
                    Some(stored) => {
                        self.session
                            .fade(address, None, stored, *fade_ms, ValueEncoding::Decibel)
                    }
                    None => debug!(address = %address, "Nothing stored to restore"),
                }
            }

            Action::PanSet {
                target,
                pan,
                fade_ms,
            } => {
                let address = self.paths.pan(target).ok_or(ActionError::NoPath {
                    target: *target,
                    what: "pan",
                })?;
                self.session.fade(
                    address,
                    None,
                    f64::from(levels::pan_to_float(*pan)),
                    *fade_ms,
                    ValueEncoding::Linear,
                );
            }

            Action::Mute { target, state } => {
                let address = self.paths.mute(target);
                let mute = match state {
                    MuteState::On => true,
                    MuteState::Off => false,
                    MuteState::Toggle => !self.is_muted(&address).await,
                };
                // The console's "on" switch is the inverse of mute
                self.session
                    .send(address, vec![OscArg::Int(if mute { 0 } else { 1 })]);
            }

            Action::Send { address, args } => {
                self.session.send(address.clone(), args.clone());
            }
        }

        Ok(())
    }

    /// Cached level in dB, loading it first if needed
    async fn current_db(&self, address: &str) -> Option<f64> {
        let cached = match self.session.get(address).await {
            Some(args) => Some(args),
            None => match self.session.ensure_loaded(address).await {
                LoadOutcome::Loaded | LoadOutcome::AlreadyKnown => self.session.get(address).await,
                _ => None,
            },
        };
        cached
            .as_ref()
            .and_then(|args| args.first())
            .and_then(|arg| ValueEncoding::Decibel.decode(arg))
    }

    /// Unknown state counts as not muted
    async fn is_muted(&self, address: &str) -> bool {
        self.session
            .get(address)
            .await
            .and_then(|args| args.first().and_then(OscArg::as_i32))
            .is_some_and(|on| on == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::{InboundMessage, Transport, TransportError};
    use crate::session::{SessionActor, SessionConfig};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    #[derive(Default)]
    struct Wire(Mutex<Vec<(String, Vec<OscArg>)>>);

    impl Transport for Wire {
        fn send(&self, address: &str, args: Vec<OscArg>) -> Result<(), TransportError> {
            self.0.lock().push((address.to_string(), args));
            Ok(())
        }
    }

    impl Wire {
        fn last(&self, address: &str) -> Option<Vec<OscArg>> {
            self.0
                .lock()
                .iter()
                .rev()
                .find(|(a, _)| a == address)
                .map(|(_, args)| args.clone())
        }
    }

    fn executor() -> (
        ActionExecutor,
        Arc<Wire>,
        mpsc::UnboundedSender<InboundMessage>,
    ) {
        let wire = Arc::new(Wire::default());
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let (session, _events) =
            SessionActor::spawn(SessionConfig::default(), wire.clone(), inbound_rx);
        (ActionExecutor::new(session), wire, inbound)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fader_set_immediate() {
        let (exec, wire, _inbound) = executor();
        let action = Action::FaderSet {
            target: Target::Channel(1),
            level_db: 0.0,
            fade_ms: 0,
        };
        exec.execute("btn", &action).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(wire.last("/ch/01/mix/fader"), Some(vec![OscArg::Float(0.75)]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_then_restore() {
        let (exec, wire, _inbound) = executor();
        exec.session()
            .set_local("/ch/02/mix/fader", vec![OscArg::Float(0.5)]);

        let store = Action::FaderStore {
            target: Target::Channel(2),
            delta_db: Some(-20.0),
            fade_ms: 0,
        };
        exec.execute("dip", &store).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(
            wire.last("/ch/02/mix/fader"),
            Some(vec![OscArg::Float(levels::db_to_float(-30.0))])
        );

        let restore = Action::FaderRestore {
            target: Target::Channel(2),
            fade_ms: 0,
        };
        exec.execute("dip", &restore).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(wire.last("/ch/02/mix/fader"), Some(vec![OscArg::Float(0.5)]));

        // The stash slot was consumed
        let writes = wire.0.lock().len();
        exec.execute("dip", &restore).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(wire.0.lock().len(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delta_loads_unknown_level() {
        let (exec, wire, inbound) = executor();
        let action = Action::FaderDelta {
            target: Target::Dca(1),
            delta_db: 5.0,
            fade_ms: 0,
        };

        let task = tokio::spawn(async move {
            exec.execute("nudge", &action).await.unwrap();
            exec
        });
        sleep(Duration::from_millis(10)).await;
        assert_eq!(wire.last("/dca/1/fader"), Some(vec![]));

        inbound
            .send(InboundMessage::new("/dca/1/fader", vec![OscArg::Float(0.5)]))
            .unwrap();
        let _exec = task.await.unwrap();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(
            wire.last("/dca/1/fader"),
            Some(vec![OscArg::Float(levels::db_to_float(-5.0))])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_toggle_defaults_to_unmuted() {
        let (exec, wire, _inbound) = executor();
        let toggle = Action::Mute {
            target: Target::Channel(3),
            state: MuteState::Toggle,
        };

        exec.execute("m", &toggle).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(wire.last("/ch/03/mix/on"), Some(vec![OscArg::Int(0)]));

        // Our own write is mirrored, so the next toggle unmutes
        exec.execute("m", &toggle).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(wire.last("/ch/03/mix/on"), Some(vec![OscArg::Int(1)]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pan_set() {
        let (exec, wire, _inbound) = executor();
        let action = Action::PanSet {
            target: Target::Bus(1),
            pan: -50.0,
            fade_ms: 0,
        };
        exec.execute("p", &action).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(wire.last("/bus/01/mix/pan"), Some(vec![OscArg::Float(0.25)]));

        let no_pan = Action::PanSet {
            target: Target::Dca(1),
            pan: 0.0,
            fade_ms: 0,
        };
        assert_eq!(
            exec.execute("p", &no_pan).await,
            Err(ActionError::NoPath {
                target: Target::Dca(1),
                what: "pan"
            })
        );
    }
}
