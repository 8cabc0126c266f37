//! Roles of the network functions placed along the chain.

use std::fmt;

use crate::error::{Error, Result};

/// What a deployed network function does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FunctionRole {
    Encoder,
    Decoder,
    /// Relay that stores and forwards packets unchanged.
    Forward,
    /// Relay that recombines received packets into new coded packets.
    Recode,
}

impl FunctionRole {
    pub const fn is_relay(self) -> bool {
        matches!(self, FunctionRole::Forward | FunctionRole::Recode)
    }

    /// Value of the relay `--action` flag; `None` for encoder and decoder.
    pub const fn action(self) -> Option<&'static str> {
        match self {
            FunctionRole::Forward => Some("forward"),
            FunctionRole::Recode => Some("recode"),
            FunctionRole::Encoder | FunctionRole::Decoder => None,
        }
    }

    /// One-letter form used in compact action map listings.
    pub const fn short(self) -> char {
        match self {
            FunctionRole::Encoder => 'E',
            FunctionRole::Decoder => 'D',
            FunctionRole::Forward => 'F',
            FunctionRole::Recode => 'R',
        }
    }
}

impl fmt::Display for FunctionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionRole::Encoder => write!(f, "encoder"),
            FunctionRole::Decoder => write!(f, "decoder"),
            FunctionRole::Forward => write!(f, "forward"),
            FunctionRole::Recode => write!(f, "recode"),
        }
    }
}

impl std::str::FromStr for FunctionRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encoder" => Ok(FunctionRole::Encoder),
            "decoder" => Ok(FunctionRole::Decoder),
            "forward" => Ok(FunctionRole::Forward),
            "recode" => Ok(FunctionRole::Recode),
            _ => Err(format!(
                "invalid role '{s}': use encoder, decoder, forward, or recode"
            )),
        }
    }
}

/// Per-relay role assignment, one entry per relay hop in chain order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionMap(Vec<FunctionRole>);

impl ActionMap {
    /// Every relay forwards; used to validate encoder and decoder alone.
    pub fn all_forward(relays: usize) -> Self {
        Self(vec![FunctionRole::Forward; relays])
    }

    /// Relay `recoder` recodes, all others forward.
    pub fn single_recoder(relays: usize, recoder: usize) -> Result<Self> {
        if recoder >= relays {
            return Err(Error::config(format!(
                "recoder index {recoder} out of range for {relays} relays"
            )));
        }
        let mut roles = vec![FunctionRole::Forward; relays];
        roles[recoder] = FunctionRole::Recode;
        Ok(Self(roles))
    }

    pub fn from_roles(roles: Vec<FunctionRole>) -> Result<Self> {
        if let Some(bad) = roles.iter().find(|r| !r.is_relay()) {
            return Err(Error::config(format!("{bad} is not a relay role")));
        }
        Ok(Self(roles))
    }

    pub fn roles(&self) -> &[FunctionRole] {
        &self.0
    }

    pub fn get(&self, relay: usize) -> Option<FunctionRole> {
        self.0.get(relay).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Positions of all recoding relays.
    pub fn recoders(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == FunctionRole::Recode)
            .map(|(i, _)| i)
            .collect()
    }

    /// Compact form such as `[R,F,F]`.
    pub fn compact(&self) -> String {
        let inner: Vec<String> = self.0.iter().map(|r| r.short().to_string()).collect();
        format!("[{}]", inner.join(","))
    }
}

impl fmt::Display for ActionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", names.join(", "))
    }
}
