use serde_json::Value;

use crate::error::OpError;

/// Commands the monitoring hub may issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubCommand {
    SetTakeName { recorder_id: String, take_name: String },
    IncrementTake { recorder_id: String },
    IncrementShot { recorder_id: String },
    StartRecording { recorder_id: String },
    StopRecording { recorder_id: String },
    GetRecorders,
    GetStatus,
}

impl HubCommand {
    pub fn parse(name: &str, params: &Value) -> Result<Self, OpError> {
        let command = match name {
            "set_take_name" => Self::SetTakeName {
                recorder_id: recorder_id(params)?,
                take_name: string_param(params, &["takeName", "take_name"])
                    .ok_or(OpError::MissingParameter("takeName"))?,
            },
            "increment_take" => Self::IncrementTake {
                recorder_id: recorder_id(params)?,
            },
            "increment_shot" => Self::IncrementShot {
                recorder_id: recorder_id(params)?,
            },
            "start_recording" => Self::StartRecording {
                recorder_id: recorder_id(params)?,
            },
            "stop_recording" => Self::StopRecording {
                recorder_id: recorder_id(params)?,
            },
            "get_recorders" => Self::GetRecorders,
            "get_status" => Self::GetStatus,
            other => return Err(OpError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetTakeName { .. } => "set_take_name",
            Self::IncrementTake { .. } => "increment_take",
            Self::IncrementShot { .. } => "increment_shot",
            Self::StartRecording { .. } => "start_recording",
            Self::StopRecording { .. } => "stop_recording",
            Self::GetRecorders => "get_recorders",
            Self::GetStatus => "get_status",
        }
    }
}

fn recorder_id(params: &Value) -> Result<String, OpError> {
    string_param(params, &["recorderId", "recorder_id"]).ok_or(OpError::MissingParameter("recorderId"))
}

fn string_param(params: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| params.get(*key))
        .filter_map(Value::as_str)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}
