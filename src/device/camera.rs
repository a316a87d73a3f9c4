//! Camera state machine

use crate::domain::command::{Command, CommandReply};
use crate::domain::types::Resolution;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraState {
    pub powered_on: bool,
    pub resolution: Resolution,
    pub recording: bool,
}

impl Default for CameraState {
    fn default() -> Self {
        Self { powered_on: false, resolution: Resolution::Hd, recording: false }
    }
}

#[derive(Debug, Default)]
pub struct Camera {
    state: CameraState,
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &CameraState {
        &self.state
    }

    pub fn apply(&mut self, command: &Command) -> CommandReply {
        let state = &mut self.state;
        match command {
            Command::PowerOn => {
                state.powered_on = true;
                CommandReply::applied("camera powered on")
            }
            Command::PowerOff => {
                state.powered_on = false;
                state.recording = false;
                CommandReply::applied("camera powered off")
            }
            Command::SetResolution(resolution) => {
                if !state.powered_on {
                    return CommandReply::rejected("camera is off");
                }
                state.resolution = *resolution;
                CommandReply::applied(format!("resolution set to {resolution}"))
            }
            Command::StartRecording => {
                if !state.powered_on {
                    return CommandReply::rejected("camera is off");
                }
                state.recording = true;
                CommandReply::applied("recording started")
            }
            Command::StopRecording => {
                state.recording = false;
                CommandReply::applied("recording stopped")
            }
            other => CommandReply::rejected(format!("{} is not a camera command", other.name())),
        }
    }
}
