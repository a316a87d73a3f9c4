//! Streetlight state machine
//!
//! Invariant: `intensity == 0` implies the lamp is off.

use crate::domain::command::{Command, CommandReply};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreetlightState {
    pub system_active: bool,
    pub lamp_on: bool,
    pub intensity: u8,
}

impl Default for StreetlightState {
    fn default() -> Self {
        Self { system_active: true, lamp_on: false, intensity: 100 }
    }
}

#[derive(Debug, Default)]
pub struct Streetlight {
    state: StreetlightState,
}

impl Streetlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &StreetlightState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.system_active
    }

    /// Local maintenance action; not reachable as a remote command
    pub fn reactivate(&mut self) {
        self.state.system_active = true;
    }

    pub fn apply(&mut self, command: &Command) -> CommandReply {
        let state = &mut self.state;
        if !state.system_active {
            return CommandReply::rejected("streetlight system is inactive");
        }

        match command {
            Command::LampOn => {
                if state.intensity == 0 {
                    state.intensity = 100;
                }
                state.lamp_on = true;
                CommandReply::applied(format!("lamp on at {}%", state.intensity))
            }
            Command::LampOff => {
                state.lamp_on = false;
                CommandReply::applied("lamp off")
            }
            Command::SetIntensity(intensity) => {
                state.intensity = *intensity;
                state.lamp_on = *intensity > 0;
                CommandReply::applied(format!("intensity set to {intensity}%"))
            }
            Command::Deactivate => {
                state.system_active = false;
                state.lamp_on = false;
                CommandReply::applied("streetlight deactivated")
            }
            other => {
                CommandReply::rejected(format!("{} is not a streetlight command", other.name()))
            }
        }
    }
}
