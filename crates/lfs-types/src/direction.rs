use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Which way objects move. Also the operation name sent during negotiation
/// and the action key looked up in a negotiated object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            other => Err(TypeError::UnknownDirection(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        assert_eq!("upload".parse::<Direction>().unwrap(), Direction::Upload);
        assert_eq!(Direction::Download.to_string(), "download");
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn serde_is_lowercase() {
        let json = serde_json::to_string(&Direction::Download).unwrap();
        assert_eq!(json, "\"download\"");
    }
}
