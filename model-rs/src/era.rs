use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target aesthetic a stylesheet is generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Era {
    Web1996,
    Win95,
    Win98,
    Winxp,
}

impl Era {
    pub const ALL: [Era; 4] = [Era::Web1996, Era::Win95, Era::Win98, Era::Winxp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Era::Web1996 => "web1996",
            Era::Win95 => "win95",
            Era::Win98 => "win98",
            Era::Winxp => "winxp",
        }
    }
}

impl Default for Era {
    fn default() -> Self {
        Era::Win95
    }
}

impl fmt::Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown era: {0}")]
pub struct UnknownEra(pub String);

impl FromStr for Era {
    type Err = UnknownEra;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Era::ALL
            .into_iter()
            .find(|era| era.as_str() == lowered)
            .ok_or(UnknownEra(s.to_string()))
    }
}
