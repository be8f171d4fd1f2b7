use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// One of the two independent migration streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Order,
    Withdraw,
}

impl Kind {
    /// Every stream, in the order the coordinator dispatches and reports them.
    pub const ALL: [Kind; 2] = [Kind::Order, Kind::Withdraw];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Order => "order",
            Kind::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "order" => Ok(Kind::Order),
            "withdraw" => Ok(Kind::Withdraw),
            other => Err(anyhow::anyhow!("unknown kind {other:?} (expected order or withdraw)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Kind;

    #[test]
    fn parses_display_names_case_insensitively() {
        for kind in Kind::ALL {
            assert_eq!(kind.to_string().to_uppercase().parse::<Kind>().unwrap(), kind);
        }
        assert_eq!(" withdraw ".parse::<Kind>().unwrap(), Kind::Withdraw);
        assert!("orders".parse::<Kind>().is_err());
        assert!("deposit".parse::<Kind>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Kind::Withdraw).unwrap();
        assert_eq!(json, "\"withdraw\"");
    }
}
