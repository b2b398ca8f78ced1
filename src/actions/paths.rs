//! Wire address resolution for mixer strips
//!
//! The session treats addresses as opaque strings; this is the one place
//! that knows how the console lays out its parameter tree.

use std::fmt;

use super::options::OptionError;

/// A mixer strip an action can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Input channel 1-32
    Channel(u8),
    /// Aux input 1-8
    AuxIn(u8),
    /// FX return 1-8
    FxReturn(u8),
    /// Mix bus 1-16
    Bus(u8),
    /// Matrix 1-6
    Matrix(u8),
    /// Stereo main
    Main,
    /// Mono/centre main
    MainMono,
    /// DCA group 1-8
    Dca(u8),
}

impl Target {
    /// Parse a selector like `/ch/01`, `bus/3`, `/main/st` or `dca/2`
    pub fn parse(selector: &str) -> Result<Self, OptionError> {
        let trimmed = selector.trim().trim_start_matches('/').trim_end_matches('/');
        let invalid = || OptionError::Invalid {
            key: "target",
            expected: "a strip like /ch/01, /bus/03, /dca/1 or /main/st",
            got: format!("\"{}\"", selector),
        };

        match trimmed {
            "main/st" | "main" => return Ok(Target::Main),
            "main/m" => return Ok(Target::MainMono),
            _ => {}
        }

        let (kind, number) = trimmed.split_once('/').ok_or_else(invalid)?;
        let n = number.parse::<u8>().map_err(|_| invalid())?;

        let (target, max) = match kind {
            "ch" => (Target::Channel(n), 32),
            "auxin" => (Target::AuxIn(n), 8),
            "fxrtn" => (Target::FxReturn(n), 8),
            "bus" => (Target::Bus(n), 16),
            "mtx" => (Target::Matrix(n), 6),
            "dca" => (Target::Dca(n), 8),
            _ => return Err(invalid()),
        };

        if n == 0 || n > max {
            return Err(invalid());
        }
        Ok(target)
    }

    /// Address prefix of the strip
    pub fn base(&self) -> String {
        match self {
            Target::Channel(n) => format!("/ch/{:02}", n),
            Target::AuxIn(n) => format!("/auxin/{:02}", n),
            Target::FxReturn(n) => format!("/fxrtn/{:02}", n),
            Target::Bus(n) => format!("/bus/{:02}", n),
            Target::Matrix(n) => format!("/mtx/{:02}", n),
            Target::Main => "/main/st".to_string(),
            Target::MainMono => "/main/m".to_string(),
            Target::Dca(n) => format!("/dca/{}", n),
        }
    }

    pub fn has_pan(&self) -> bool {
        !matches!(self, Target::Dca(_) | Target::MainMono)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base())
    }
}

/// Maps a strip onto the concrete addresses actions touch
pub trait PathResolver: Send + Sync {
    fn level(&self, target: &Target) -> String;
    fn mute(&self, target: &Target) -> String;
    fn pan(&self, target: &Target) -> Option<String>;
    fn name(&self, target: &Target) -> String;
}

/// X32/M32 parameter tree
#[derive(Debug, Clone, Copy, Default)]
pub struct X32Paths;

impl PathResolver for X32Paths {
    fn level(&self, target: &Target) -> String {
        match target {
            Target::Dca(_) => format!("{}/fader", target.base()),
            _ => format!("{}/mix/fader", target.base()),
        }
    }

    fn mute(&self, target: &Target) -> String {
        match target {
            Target::Dca(_) => format!("{}/on", target.base()),
            _ => format!("{}/mix/on", target.base()),
        }
    }

    fn pan(&self, target: &Target) -> Option<String> {
        target
            .has_pan()
            .then(|| format!("{}/mix/pan", target.base()))
    }

    fn name(&self, target: &Target) -> String {
        format!("{}/config/name", target.base())
    }
}
