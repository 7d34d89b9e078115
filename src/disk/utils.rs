use anyhow::{anyhow, bail, Context, Result};
use dialoguer::{Confirm, Select};
use std::path::Path;
use std::sync::Arc;

use super::device::{Device, RetryPolicy};
use super::exception::{Choice, Exception, ExceptionHandler, FixedPolicy};
use super::Sector;
use crate::config::ErrorPolicy;

pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        bail!("size is empty");
    }

    let (num_str, unit) = s.split_at(s.len().saturating_sub(1));
    let (value, multiplier) = match unit.to_ascii_lowercase().as_str() {
        "k" => (num_str, 1024u64),
        "m" => (num_str, 1024u64 * 1024),
        "g" => (num_str, 1024u64 * 1024 * 1024),
        _ => (s, 1u64),
    };

    let num: u64 = value
        .parse()
        .map_err(|_| anyhow!("invalid size: {input}"))?;
    Ok(num.saturating_mul(multiplier))
}

/// Which side of a range a position names. An end given in bytes or as a
/// percentage is exclusive, so it maps to the sector before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Start,
    End,
}

/// Parses a position on `dev`: `2048s` is a sector, `50%` a share of the
/// device, anything else a byte offset with optional K/M/G suffix.
pub fn parse_position(input: &str, dev: &Device, bound: Bound) -> Result<Sector> {
    let s = input.trim();
    let length = dev.length();

    if let Some(sectors) = s.strip_suffix('s') {
        let sector: Sector = sectors
            .parse()
            .map_err(|_| anyhow!("invalid sector: {input}"))?;
        if sector < 0 {
            return Ok(length + sector);
        }
        return Ok(sector);
    }

    let sector = if let Some(percent) = s.strip_suffix('%') {
        let pct: f64 = percent
            .parse()
            .map_err(|_| anyhow!("invalid percentage: {input}"))?;
        if !(0.0..=100.0).contains(&pct) {
            bail!("percentage out of range: {input}");
        }
        (length as f64 * pct / 100.0).round() as Sector
    } else {
        (parse_size(s)? / dev.sector_size()) as Sector
    };

    Ok(match bound {
        Bound::Start => sector,
        Bound::End => sector - 1,
    })
}

pub fn confirm_or_yes(yes: bool, prompt: &str) -> Result<()> {
    if yes {
        return Ok(());
    }
    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| anyhow!("prompt failed: {e}"))?;
    if confirmed {
        Ok(())
    } else {
        bail!("aborted by user")
    }
}

/// Asks on the terminal which of the offered answers to take.
pub struct Prompt;

impl ExceptionHandler for Prompt {
    fn handle(&self, exception: &Exception) -> Choice {
        let choices = exception.options.choices();
        if choices.is_empty() {
            return Choice::Unhandled;
        }
        let items: Vec<&str> = choices.iter().map(|c| c.name()).collect();
        let picked = Select::new()
            .with_prompt(format!("{}: {}", exception.kind, exception.message))
            .items(&items)
            .default(0)
            .interact_opt();
        match picked {
            Ok(Some(i)) => choices[i],
            Ok(None) => Choice::Unhandled,
            Err(e) => {
                warn!("prompt failed: {}", e);
                Choice::Unhandled
            }
        }
    }
}

pub fn handler_for(policy: ErrorPolicy) -> Box<dyn ExceptionHandler> {
    match policy {
        ErrorPolicy::Prompt => Box::new(Prompt),
        ErrorPolicy::Ignore => Box::new(FixedPolicy(Choice::Ignore)),
        ErrorPolicy::Cancel => Box::new(FixedPolicy(Choice::Cancel)),
    }
}

pub fn open_device(path: &Path, read_only: bool, retry: RetryPolicy) -> Result<Arc<Device>> {
    let dev = Device::open_image(path, read_only)
        .with_context(|| format!("failed to open disk image {}", path.display()))?;
    dev.set_retry_policy(retry);
    Ok(dev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("4K").unwrap(), 4096);
        assert_eq!(parse_size("1m").unwrap(), 1024 * 1024);
        assert!(parse_size("").is_err());
        assert!(parse_size("12q").is_err());
    }

    #[test]
    fn test_parse_position() {
        let dev = Device::memory("mem0", 2048, 512);
        assert_eq!(parse_position("100s", &dev, Bound::End).unwrap(), 100);
        assert_eq!(parse_position("-1s", &dev, Bound::End).unwrap(), 2047);
        assert_eq!(parse_position("1K", &dev, Bound::Start).unwrap(), 2);
        assert_eq!(parse_position("1K", &dev, Bound::End).unwrap(), 1);
        assert_eq!(parse_position("50%", &dev, Bound::Start).unwrap(), 1024);
        assert_eq!(parse_position("100%", &dev, Bound::End).unwrap(), 2047);
        assert!(parse_position("150%", &dev, Bound::End).is_err());
        assert!(parse_position("xs", &dev, Bound::Start).is_err());
    }

    #[test]
    fn test_handler_for_fixed_policies() {
        let exception = Exception {
            kind: super::super::exception::ExceptionType::Warning,
            options: super::super::exception::ExceptionOptions::IGNORE_CANCEL,
            message: "test".to_string(),
        };
        assert_eq!(handler_for(ErrorPolicy::Ignore).handle(&exception), Choice::Ignore);
        assert_eq!(handler_for(ErrorPolicy::Cancel).handle(&exception), Choice::Cancel);
    }
}
