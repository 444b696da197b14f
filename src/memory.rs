use thiserror::Error;

const DEFAULT_GC_THRESHOLD_COEFF: f64 = 0.7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryParseError {
    #[error("memory value is empty or zero")]
    Empty,
    #[error("memory value has an invalid format: {0:?}")]
    InvalidFormat(String),
    #[error("unknown memory unit: {0:?}")]
    UnknownUnit(String),
}

/// Parse a human memory size like `"256 KB"`, `"8MB"` or `"2 GB"` into
/// bytes. The format is a decimal integer followed by an optional space and
/// a K/KB/M/MB/G/GB/T/TB suffix.
pub fn parse_memory_size(value: &str) -> Result<i64, MemoryParseError> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() || normalized == "0" {
        return Err(MemoryParseError::Empty);
    }
    if !normalized
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ')
    {
        return Err(MemoryParseError::InvalidFormat(value.to_string()));
    }

    let digits: String = normalized.chars().take_while(|c| c.is_ascii_digit()).collect();
    let rest = normalized[digits.len()..].trim();
    if digits.is_empty() || rest.is_empty() || !rest.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(MemoryParseError::InvalidFormat(value.to_string()));
    }

    let amount: i64 = digits
        .parse()
        .map_err(|_| MemoryParseError::InvalidFormat(value.to_string()))?;

    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;
    const TB: i64 = GB * 1024;
    let multiplier = match rest {
        "K" | "KB" => KB,
        "M" | "MB" => MB,
        "G" | "GB" => GB,
        "T" | "TB" => TB,
        unit => return Err(MemoryParseError::UnknownUnit(unit.to_string())),
    };

    Ok(amount * multiplier)
}

/// Memory budget from the `UNIKERNEL_MEMORY` environment variable.
pub fn unikernel_memory() -> Result<i64, MemoryParseError> {
    parse_memory_size(&std::env::var("UNIKERNEL_MEMORY").unwrap_or_default())
}

/// Allocator budget derived from the memory limit, scaled by
/// `GCTHRESHOLDCOEFF` (default 0.7).
pub fn allocator_budget(memory_limit: i64) -> i64 {
    let coeff = std::env::var("GCTHRESHOLDCOEFF")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(DEFAULT_GC_THRESHOLD_COEFF);
    (memory_limit as f64 * coeff) as i64
}
