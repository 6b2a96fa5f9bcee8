use serde::{Deserialize, Serialize};

use crate::time::{self, TimeError, NO_TIME};

/// Whether `now` falls inside `[on, off)`. A window with `on > off` wraps past
/// midnight. Equal endpoints or an unset endpoint never match.
pub fn is_time_in_range(now: i32, on: i32, off: i32) -> bool {
    if on < 0 || off < 0 || on == off {
        return false;
    }

    if on < off {
        now >= on && now < off
    } else {
        now >= on || now < off
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySchedule {
    #[serde(rename = "onTime")]
    pub on_time: i32,
    #[serde(rename = "offTime")]
    pub off_time: i32,
}

impl Default for RelaySchedule {
    fn default() -> Self {
        Self::unset()
    }
}

impl RelaySchedule {
    pub const NEUTRAL: Self = Self {
        on_time: 0,
        off_time: 0,
    };

    pub fn new(on_time: i32, off_time: i32) -> Self {
        Self { on_time, off_time }
    }

    pub fn unset() -> Self {
        Self::new(NO_TIME, NO_TIME)
    }

    pub fn is_unset(&self) -> bool {
        self.on_time == NO_TIME || self.off_time == NO_TIME
    }

    /// `on == off` is the device's own definition of a schedule that never fires.
    pub fn is_neutral(&self) -> bool {
        self.on_time == self.off_time
    }

    pub fn is_active(&self) -> bool {
        !self.is_unset() && !self.is_neutral()
    }

    pub fn is_on_at(&self, now: i32) -> bool {
        self.is_active() && is_time_in_range(now, self.on_time, self.off_time)
    }

    pub fn validate(&self) -> Result<(), TimeError> {
        time::decode(self.on_time)?;
        time::decode(self.off_time)?;
        Ok(())
    }

    pub fn describe(&self) -> String {
        if !self.is_active() {
            return "Not set".to_string();
        }

        match (
            time::to_twelve_hour(self.on_time),
            time::to_twelve_hour(self.off_time),
        ) {
            (Ok(on), Ok(off)) => format!("{on} - {off}"),
            _ => "Invalid".to_string(),
        }
    }
}
