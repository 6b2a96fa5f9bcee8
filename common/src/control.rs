use thiserror::Error;

use crate::{
    schedule::RelaySchedule,
    time::TimeError,
    types::{DeviceStatus, RelayControlMode, RelayId, RelayModes},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("relay {0} already has an operation in flight")]
    Busy(RelayId),
    #[error("relay {0} is in manual mode; switch it to timer mode before editing its schedule")]
    ModeConflict(RelayId),
    #[error(transparent)]
    InvalidTime(#[from] TimeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    SetRelay {
        relay: RelayId,
        on: bool,
        override_schedule: bool,
    },
    SetTimer {
        relay: RelayId,
        schedule: RelaySchedule,
    },
    ClearOverride {
        relay: RelayId,
    },
}

impl RelayCommand {
    pub fn relay(&self) -> RelayId {
        match self {
            Self::SetRelay { relay, .. }
            | Self::SetTimer { relay, .. }
            | Self::ClearOverride { relay } => *relay,
        }
    }

    pub fn neutralize(relay: RelayId) -> Self {
        Self::SetTimer {
            relay,
            schedule: RelaySchedule::NEUTRAL,
        }
    }
}

/// Handle for an operation holding a relay's in-flight flag. Finishing a
/// ticket that has since been superseded is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTicket {
    relay: RelayId,
    id: u64,
}

impl OperationTicket {
    pub fn relay(&self) -> RelayId {
        self.relay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleDecision {
    pub ticket: OperationTicket,
    pub command: RelayCommand,
    pub target_on: bool,
    pub override_applied: bool,
    pub timer_may_reassert: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct RelayControl {
    mode: RelayControlMode,
    in_flight: bool,
    cooldown_until_ms: Option<u64>,
    ticket: u64,
    manual_state: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RelayArbiter {
    cooldown_ms: u64,
    relays: [RelayControl; 2],
    next_ticket: u64,
}

impl RelayArbiter {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            cooldown_ms,
            relays: [RelayControl::default(); 2],
            next_ticket: 0,
        }
    }

    pub fn mode(&self, relay: RelayId) -> RelayControlMode {
        self.relays[relay.index()].mode
    }

    pub fn manual_state(&self, relay: RelayId) -> Option<bool> {
        self.relays[relay.index()].manual_state
    }

    pub fn is_busy(&self, relay: RelayId, now_ms: u64) -> bool {
        let control = &self.relays[relay.index()];
        control.in_flight
            || control
                .cooldown_until_ms
                .map(|until| now_ms < until)
                .unwrap_or(false)
    }

    pub fn manual_relays(&self) -> Vec<RelayId> {
        RelayId::ALL
            .into_iter()
            .filter(|relay| self.mode(*relay) == RelayControlMode::Manual)
            .collect()
    }

    pub fn has_manual_relays(&self) -> bool {
        !self.manual_relays().is_empty()
    }

    pub fn modes(&self) -> RelayModes {
        let mut modes = RelayModes::default();
        for relay in RelayId::ALL {
            modes.set(relay, self.mode(relay));
        }
        modes
    }

    pub fn restore_modes(&mut self, modes: RelayModes) {
        for relay in RelayId::ALL {
            let control = &mut self.relays[relay.index()];
            control.mode = modes.get(relay);
            control.manual_state = None;
        }
    }

    pub fn begin_manual(
        &mut self,
        relay: RelayId,
        physical_state: Option<bool>,
        now_ms: u64,
    ) -> Result<(OperationTicket, RelayCommand), ControlError> {
        let ticket = self.claim(relay, now_ms)?;
        self.relays[relay.index()].manual_state = physical_state;
        Ok((ticket, RelayCommand::neutralize(relay)))
    }

    /// Manual mode only takes effect once the device accepted the neutral
    /// schedule. The cooldown starts either way.
    pub fn finish_manual(&mut self, ticket: OperationTicket, succeeded: bool, now_ms: u64) {
        if !self.is_current(ticket) {
            return;
        }

        let cooldown_ms = self.cooldown_ms;
        let control = &mut self.relays[ticket.relay.index()];
        control.in_flight = false;
        control.cooldown_until_ms = Some(now_ms.saturating_add(cooldown_ms));
        if succeeded {
            control.mode = RelayControlMode::Manual;
        } else {
            control.manual_state = None;
        }
    }

    pub fn enable_timer(&mut self, relay: RelayId) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;

        let control = &mut self.relays[relay.index()];
        control.mode = RelayControlMode::Timer;
        control.in_flight = false;
        control.cooldown_until_ms = None;
        control.manual_state = None;
        control.ticket = ticket;
    }

    pub fn begin_toggle(
        &mut self,
        relay: RelayId,
        current_on: bool,
        requested_override: bool,
        now_ms: u64,
    ) -> Result<ToggleDecision, ControlError> {
        let ticket = self.claim(relay, now_ms)?;

        let manual = self.mode(relay) == RelayControlMode::Manual;
        let override_applied = manual || requested_override;
        let target_on = !current_on;

        Ok(ToggleDecision {
            ticket,
            command: RelayCommand::SetRelay {
                relay,
                on: target_on,
                override_schedule: override_applied,
            },
            target_on,
            override_applied,
            timer_may_reassert: !manual && !override_applied,
        })
    }

    pub fn finish_toggle(&mut self, ticket: OperationTicket, applied_state: Option<bool>) {
        if !self.is_current(ticket) {
            return;
        }

        let control = &mut self.relays[ticket.relay.index()];
        control.in_flight = false;
        if control.mode == RelayControlMode::Manual && applied_state.is_some() {
            control.manual_state = applied_state;
        }
    }

    pub fn begin_clear_override(
        &mut self,
        relay: RelayId,
        now_ms: u64,
    ) -> Result<(OperationTicket, RelayCommand), ControlError> {
        let ticket = self.claim(relay, now_ms)?;
        Ok((ticket, RelayCommand::ClearOverride { relay }))
    }

    pub fn finish(&mut self, ticket: OperationTicket) {
        if self.is_current(ticket) {
            self.relays[ticket.relay.index()].in_flight = false;
        }
    }

    /// Schedule edits are rejected while manual mode suppresses the schedule.
    /// They hold the in-flight flag but never start a cooldown.
    pub fn begin_schedule(
        &mut self,
        relay: RelayId,
        schedule: RelaySchedule,
    ) -> Result<(OperationTicket, RelayCommand), ControlError> {
        if self.mode(relay) == RelayControlMode::Manual {
            return Err(ControlError::ModeConflict(relay));
        }
        schedule.validate()?;
        if self.relays[relay.index()].in_flight {
            return Err(ControlError::Busy(relay));
        }

        Ok((self.take(relay), RelayCommand::SetTimer { relay, schedule }))
    }

    pub fn reconcile(&self, status: &DeviceStatus) -> Vec<RelayCommand> {
        self.manual_relays()
            .into_iter()
            .filter(|relay| !status.relay(*relay).schedule.is_neutral())
            .map(RelayCommand::neutralize)
            .collect()
    }

    fn claim(&mut self, relay: RelayId, now_ms: u64) -> Result<OperationTicket, ControlError> {
        if self.is_busy(relay, now_ms) {
            return Err(ControlError::Busy(relay));
        }

        self.relays[relay.index()].cooldown_until_ms = None;
        Ok(self.take(relay))
    }

    fn take(&mut self, relay: RelayId) -> OperationTicket {
        self.next_ticket += 1;
        let control = &mut self.relays[relay.index()];
        control.in_flight = true;
        control.ticket = self.next_ticket;

        OperationTicket {
            relay,
            id: self.next_ticket,
        }
    }

    fn is_current(&self, ticket: OperationTicket) -> bool {
        self.relays[ticket.relay.index()].ticket == ticket.id
    }
}
