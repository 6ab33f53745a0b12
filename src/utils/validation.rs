use crate::utils::error::{EngineError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(EngineError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(EngineError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

/// 顏色必須是 `#RRGGBB` 形式
pub fn validate_hex_color(field_name: &str, value: &str) -> Result<()> {
    static HEX_COLOR: OnceLock<Regex> = OnceLock::new();
    let re = HEX_COLOR.get_or_init(|| {
        Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("hex color pattern is valid")
    });

    if !re.is_match(value) {
        return Err(EngineError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Color must be a hex string like #FFC7CE".to_string(),
        });
    }
    Ok(())
}

/// 檢查名稱不重複，回傳第一個重複的名稱
pub fn validate_unique_names<'a, I>(field_name: &str, names: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(EngineError::ConfigValidationError {
                field: field_name.to_string(),
                message: format!("Duplicate name '{}'", name),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_hex_color() {
        assert!(validate_hex_color("color", "#FFFFFF").is_ok());
        assert!(validate_hex_color("color", "#ffc7ce").is_ok());
        assert!(validate_hex_color("color", "FFFFFF").is_err());
        assert!(validate_hex_color("color", "#FFF").is_err());
        assert!(validate_hex_color("color", "red").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("width", 100.0, 0.0, 255.0).is_ok());
        assert!(validate_range("width", 255.0, 0.0, 255.0).is_ok());
        assert!(validate_range("width", 300.0, 0.0, 255.0).is_err());
        assert!(validate_range("width", -1.0, 0.0, 255.0).is_err());
    }

    #[test]
    fn test_validate_unique_names() {
        assert!(validate_unique_names("templates", ["a", "b"]).is_ok());
        let err = validate_unique_names("templates", ["a", "b", "a"]).unwrap_err();
        assert!(err.to_string().contains("Duplicate name 'a'"));
    }

    #[test]
    fn test_validate_non_empty_string() {
        assert!(validate_non_empty_string("template_id", "HRBulkUpload").is_ok());
        assert!(validate_non_empty_string("template_id", "   ").is_err());
    }
}
