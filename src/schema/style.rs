use serde::{Deserialize, Serialize};

/// Fixed set of logo style tags offered by the input screen. `None` is the
/// "no style" sentinel and the default selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogoStyle {
    #[default]
    None,
    Monogram,
    Abstract,
    Mascot,
    Minimal,
    Vintage,
}

impl LogoStyle {
    pub const ALL: [LogoStyle; 6] = [
        LogoStyle::None,
        LogoStyle::Monogram,
        LogoStyle::Abstract,
        LogoStyle::Mascot,
        LogoStyle::Minimal,
        LogoStyle::Vintage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogoStyle::None => "none",
            LogoStyle::Monogram => "monogram",
            LogoStyle::Abstract => "abstract",
            LogoStyle::Mascot => "mascot",
            LogoStyle::Minimal => "minimal",
            LogoStyle::Vintage => "vintage",
        }
    }

    /// Display name shown next to a job in the history list.
    pub fn label(self) -> &'static str {
        match self {
            LogoStyle::None => "No Style",
            LogoStyle::Monogram => "Monogram",
            LogoStyle::Abstract => "Abstract",
            LogoStyle::Mascot => "Mascot",
            LogoStyle::Minimal => "Minimal",
            LogoStyle::Vintage => "Vintage",
        }
    }
}

impl std::fmt::Display for LogoStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogoStyle {
    type Err = UnknownStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogoStyle::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStyle(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown logo style: {0}")]
pub struct UnknownStyle(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_styles_case_insensitively() {
        assert_eq!("monogram".parse::<LogoStyle>().unwrap(), LogoStyle::Monogram);
        assert_eq!("Vintage".parse::<LogoStyle>().unwrap(), LogoStyle::Vintage);
    }

    #[test]
    fn rejects_unknown_style() {
        assert!("brutalist".parse::<LogoStyle>().is_err());
    }

    #[test]
    fn default_is_the_sentinel() {
        assert_eq!(LogoStyle::default(), LogoStyle::None);
    }

    #[test]
    fn serde_round_trip_matches_as_str() {
        for style in LogoStyle::ALL {
            let json = serde_json::to_string(&style).unwrap();
            assert_eq!(json, format!("\"{}\"", style.as_str()));
            let back: LogoStyle = serde_json::from_str(&json).unwrap();
            assert_eq!(back, style);
        }
    }
}
