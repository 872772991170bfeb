//! Input validation shared by the service layer.
//!
//! Lengths are counted in characters after trimming.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::BoardError;

pub const TITLE_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;
pub const COMMENT_MAX_CHARS: usize = 1000;
pub const LABEL_NAME_MAX_CHARS: usize = 50;

fn hex_color_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").unwrap())
}

/// Trimmed `value`, required to hold between 1 and `max` characters.
pub fn required_text(field: &str, value: &str, max: usize) -> Result<String, BoardError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BoardError::validation(format!("{} is required", field)));
    }
    if trimmed.chars().count() > max {
        return Err(BoardError::validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(trimmed.to_string())
}

/// Trimmed `value`, required to be non-blank.
pub fn non_empty(field: &str, value: &str) -> Result<String, BoardError> {
    required_text(field, value, usize::MAX)
}

pub fn title(value: &str) -> Result<String, BoardError> {
    required_text("Title", value, TITLE_MAX_CHARS)
}

pub fn description(value: &str) -> Result<String, BoardError> {
    required_text("Description", value, DESCRIPTION_MAX_CHARS)
}

pub fn comment_content(value: &str) -> Result<String, BoardError> {
    required_text("Comment", value, COMMENT_MAX_CHARS)
}

pub fn label_name(value: &str) -> Result<String, BoardError> {
    required_text("Label name", value, LABEL_NAME_MAX_CHARS)
}

/// A `#RRGGBB` color, case-insensitive.
pub fn hex_color(field: &str, value: &str) -> Result<String, BoardError> {
    let trimmed = value.trim();
    if hex_color_re().is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(BoardError::validation(format!(
            "{} must be a hex color like #3b82f6",
            field
        )))
    }
}

pub fn is_hex_color(value: &str) -> bool {
    hex_color_re().is_match(value.trim())
}

/// `#RRGGBB` as the space-separated `H S% L%` triple used for CSS
/// custom properties. `None` when the input is not a hex color.
pub fn hex_to_hsl(hex: &str) -> Option<String> {
    let hex = hex.trim();
    if !is_hex_color(hex) {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| -> Option<f64> {
        u8::from_str_radix(&hex[range], 16)
            .ok()
            .map(|v| f64::from(v) / 255.0)
    };
    let (r, g, b) = (channel(1..3)?, channel(3..5)?, channel(5..7)?);

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    let (mut h, mut s) = (0.0, 0.0);

    if max != min {
        let d = max - min;
        s = if l > 0.5 {
            d / (2.0 - max - min)
        } else {
            d / (max + min)
        };
        h = if max == r {
            (g - b) / d + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / d + 2.0
        } else {
            (r - g) / d + 4.0
        };
        h /= 6.0;
    }

    Some(format!(
        "{} {}% {}%",
        (h * 360.0).round(),
        (s * 100.0).round(),
        (l * 100.0).round()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_limits() {
        assert_eq!(title("  Dark mode  ").unwrap(), "Dark mode");
        assert!(title("   ").is_err());
        assert!(title(&"x".repeat(100)).is_ok());
        assert!(title(&"x".repeat(101)).is_err());
    }

    #[test]
    fn non_empty_only_rejects_blank() {
        assert_eq!(non_empty("Tagline", " Ship it ").unwrap(), "Ship it");
        assert!(non_empty("Tagline", "\t").is_err());
    }

    #[test]
    fn description_counts_characters_not_bytes() {
        let accented = "é".repeat(1000);
        assert!(description(&accented).is_ok());
        assert!(description(&format!("{}é", accented)).is_err());
    }

    #[test]
    fn hex_colors_are_case_insensitive() {
        assert!(hex_color("Primary color", "#3B82F6").is_ok());
        assert!(hex_color("Primary color", "#3b82f6").is_ok());
        assert!(hex_color("Primary color", "3b82f6").is_err());
        assert!(hex_color("Primary color", "#3b82f").is_err());
        assert!(hex_color("Primary color", "#3b82fg").is_err());
    }

    #[test]
    fn hsl_conversion_matches_css() {
        assert_eq!(hex_to_hsl("#3b82f6").as_deref(), Some("217 91% 60%"));
        assert_eq!(hex_to_hsl("#ffffff").as_deref(), Some("0 0% 100%"));
        assert_eq!(hex_to_hsl("#ff0000").as_deref(), Some("0 100% 50%"));
        assert_eq!(hex_to_hsl("blue"), None);
    }
}
