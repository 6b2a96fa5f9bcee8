use chrono::Utc;
use chrono_tz::Tz;
use powermate_common::{time::hhmm_of, DeviceStatus, RelayId, RelaySchedule, RelayStatus};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceClock {
    Zone(Tz),
    Fixed(i32),
}

impl DeviceClock {
    pub fn now_hhmm(&self) -> i32 {
        match self {
            Self::Zone(tz) => hhmm_of(&Utc::now().with_timezone(tz)),
            Self::Fixed(hhmm) => *hhmm,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedDevice {
    relays: [RelayStatus; 2],
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relay(&self, relay: RelayId) -> &RelayStatus {
        &self.relays[relay.index()]
    }

    pub fn status(&self, now_hhmm: i32) -> DeviceStatus {
        DeviceStatus {
            current_time: now_hhmm,
            relays: self.relays,
        }
    }

    /// Without override the next evaluation may put the schedule's state back.
    pub fn set_relay(&mut self, relay: RelayId, on: bool, override_schedule: bool) {
        let state = &mut self.relays[relay.index()];
        state.on = on;
        state.override_active = override_schedule;
    }

    pub fn set_timer(&mut self, relay: RelayId, schedule: RelaySchedule) {
        self.relays[relay.index()].schedule = schedule;
    }

    pub fn clear_override(&mut self, relay: RelayId, now_hhmm: i32) -> Option<bool> {
        self.relays[relay.index()].override_active = false;
        self.evaluate_relay(relay, now_hhmm)
    }

    pub fn evaluate(&mut self, now_hhmm: i32) -> Vec<(RelayId, bool)> {
        RelayId::ALL
            .into_iter()
            .filter_map(|relay| {
                self.evaluate_relay(relay, now_hhmm)
                    .map(|on| (relay, on))
            })
            .collect()
    }

    fn evaluate_relay(&mut self, relay: RelayId, now_hhmm: i32) -> Option<bool> {
        let state = &mut self.relays[relay.index()];
        if state.override_active || !state.schedule.is_active() {
            return None;
        }

        let scheduled = state.schedule.is_on_at(now_hhmm);
        if scheduled == state.on {
            return None;
        }
        state.on = scheduled;
        Some(scheduled)
    }
}
