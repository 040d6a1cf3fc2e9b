use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RoomError;

/// The numeric cards, in deck order.
pub const CARDS: [u8; 11] = [0, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89];

/// One card from the deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "VoteValue", try_from = "VoteValue")]
pub enum Estimate {
    Points(u8),
    /// No finite estimate.
    Infinity,
    /// Unable to estimate.
    Unknown,
}

impl Estimate {
    pub fn points(&self) -> Option<u8> {
        match self {
            Estimate::Points(p) => Some(*p),
            _ => None,
        }
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Estimate::Points(p) => write!(f, "{p}"),
            Estimate::Infinity => f.write_str("infinity"),
            Estimate::Unknown => f.write_str("unknown"),
        }
    }
}

/// A vote as it arrives on the wire, before it is checked against the deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoteValue {
    Integer(i64),
    Float(f64),
    Symbol(String),
}

impl From<Estimate> for VoteValue {
    fn from(estimate: Estimate) -> Self {
        match estimate {
            Estimate::Points(p) => VoteValue::Integer(p.into()),
            Estimate::Infinity => VoteValue::Symbol("infinity".to_owned()),
            Estimate::Unknown => VoteValue::Symbol("unknown".to_owned()),
        }
    }
}

impl TryFrom<VoteValue> for Estimate {
    type Error = RoomError;

    fn try_from(value: VoteValue) -> Result<Self, Self::Error> {
        match &value {
            VoteValue::Integer(n) => {
                if let Ok(p) = u8::try_from(*n) {
                    if CARDS.contains(&p) {
                        return Ok(Estimate::Points(p));
                    }
                }
                Err(RoomError::InvalidEstimate(n.to_string()))
            }
            VoteValue::Float(x) => Err(RoomError::InvalidEstimate(x.to_string())),
            VoteValue::Symbol(s) => match s.as_str() {
                "infinity" => Ok(Estimate::Infinity),
                "unknown" => Ok(Estimate::Unknown),
                _ => Err(RoomError::InvalidEstimate(s.clone())),
            },
        }
    }
}
