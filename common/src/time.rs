use std::str::FromStr;

use chrono::Timelike;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NO_TIME: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("invalid HHMM encoding: {0}")]
    InvalidEncoding(i32),
    #[error("invalid time format: {0:?}")]
    InvalidFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Period {
    Am,
    Pm,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Am => "AM",
            Self::Pm => "PM",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "am" | "a" => Some(Self::Am),
            "pm" | "p" => Some(Self::Pm),
            _ => None,
        }
    }
}

impl FromStr for Period {
    type Err = TimeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::from_token(&text.trim().to_ascii_lowercase())
            .ok_or_else(|| TimeError::InvalidFormat(text.to_string()))
    }
}

pub fn encode(hour: u32, minute: u32) -> i32 {
    (hour * 100 + minute) as i32
}

pub fn decode(hhmm: i32) -> Result<(u32, u32), TimeError> {
    if hhmm < 0 {
        return Err(TimeError::InvalidEncoding(hhmm));
    }

    let hour = (hhmm / 100) as u32;
    let minute = (hhmm % 100) as u32;
    if hour > 23 || minute >= 60 {
        return Err(TimeError::InvalidEncoding(hhmm));
    }

    Ok((hour, minute))
}

pub fn is_valid(hhmm: i32) -> bool {
    decode(hhmm).is_ok()
}

pub fn hhmm_of<T: Timelike>(time: &T) -> i32 {
    encode(time.hour(), time.minute())
}

pub fn to_twelve_hour(hhmm: i32) -> Result<String, TimeError> {
    if hhmm == NO_TIME {
        return Ok(String::new());
    }

    let (hour, minute) = decode(hhmm)?;
    let period = if hour >= 12 { Period::Pm } else { Period::Am };
    let display_hour = match hour % 12 {
        0 => 12,
        h => h,
    };

    Ok(format!("{display_hour}:{minute:02} {}", period.as_str()))
}

pub fn to_twenty_four_hour(hhmm: i32) -> Result<String, TimeError> {
    if hhmm == NO_TIME {
        return Ok(String::new());
    }

    let (hour, minute) = decode(hhmm)?;
    Ok(format!("{hour:02}:{minute:02}"))
}

/// Parses free-form user input such as `8AM`, `830pm`, `7:05 p` or `13:00`.
///
/// An AM/PM token in the text and `explicit_period` must agree when both are
/// given. With a period the hour must be in `1..=12`; without one the input is
/// read as 24-hour time.
pub fn parse_user_time(text: &str, explicit_period: Option<Period>) -> Result<i32, TimeError> {
    let invalid = || TimeError::InvalidFormat(text.to_string());

    let lower = text.trim().to_ascii_lowercase();
    let split = lower
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(lower.len());
    let (numeric, token) = lower.split_at(split);
    let numeric = numeric.trim();
    let token = token.trim();

    let token_period = if token.is_empty() {
        None
    } else {
        Some(Period::from_token(token).ok_or_else(invalid)?)
    };

    let period = match (token_period, explicit_period) {
        (Some(a), Some(b)) if a != b => return Err(invalid()),
        (a, b) => a.or(b),
    };

    let (hour, minute) = split_digits(numeric).ok_or_else(invalid)?;

    let hour = match period {
        Some(_) if !(1..=12).contains(&hour) => return Err(invalid()),
        Some(Period::Am) if hour == 12 => 0,
        Some(Period::Pm) if hour != 12 => hour + 12,
        _ => hour,
    };

    if hour > 23 || minute > 59 {
        return Err(invalid());
    }

    Ok(encode(hour, minute))
}

fn split_digits(numeric: &str) -> Option<(u32, u32)> {
    if let Some((hours, minutes)) = numeric.split_once(':') {
        if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
            return None;
        }
        return Some((parse_digits(hours)?, parse_digits(minutes)?));
    }

    match numeric.len() {
        1 | 2 => Some((parse_digits(numeric)?, 0)),
        3 => Some((parse_digits(&numeric[..1])?, parse_digits(&numeric[1..])?)),
        4 => Some((parse_digits(&numeric[..2])?, parse_digits(&numeric[2..])?)),
        _ => None,
    }
}

fn parse_digits(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
