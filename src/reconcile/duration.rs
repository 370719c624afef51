//! Parses the Kubernetes duration strings accepted by `refreshAfter` and
//! `expiryOffset` fields: a plain integer followed by one of `s`/`m`/`h`/`d`.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$").expect("static pattern is valid regex")
});

#[derive(Debug, thiserror::Error)]
#[error("invalid duration {0:?}: expected <number><unit> with unit in s/m/h/d")]
pub struct DurationParseError(String);

pub fn parse(value: &str) -> Result<Duration, DurationParseError> {
    let trimmed = value.trim().to_lowercase();
    let caps = PATTERN
        .captures(&trimmed)
        .ok_or_else(|| DurationParseError(value.to_string()))?;
    let number: u64 = caps["number"]
        .parse()
        .map_err(|_| DurationParseError(value.to_string()))?;
    let secs = match &caps["unit"] {
        "s" => number,
        "m" => number * 60,
        "h" => number * 3600,
        "d" => number * 86400,
        _ => unreachable!("regex only matches s/m/h/d"),
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse("1d").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("").is_err());
        assert!(parse("5").is_err());
        assert!(parse("five minutes").is_err());
        assert!(parse("5y").is_err());
    }
}
