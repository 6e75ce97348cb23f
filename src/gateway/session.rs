//! Protocol state of a gateway session, independent of the socket.

use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use super::{
    opcode::Opcode,
    payload::{GatewayPayload, Hello, Ready},
};
use crate::error::{Error, Result};

/// What the connection should do in response to a payload.
#[derive(Debug, Clone)]
pub enum Action {
    StartHeartbeat(Duration),
    Identify,
    Resume,
    Ack,
    BeatNow,
    Ready(Box<Ready>),
    Resumed,
    Dispatch { name: String, data: Value },
    Reconnect { resume: bool },
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub session_id: Option<String>,
    pub resume_url: Option<String>,
    pub sequence: Option<u64>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    pub fn clear(&mut self) {
        self.session_id = None;
        self.resume_url = None;
        self.sequence = None;
    }

    pub fn handle(&mut self, payload: GatewayPayload) -> Result<Vec<Action>> {
        if let Some(sequence) = payload.s {
            self.sequence = Some(sequence);
        }

        let actions = match payload.opcode() {
            Some(Opcode::Hello) => {
                let hello: Hello = serde_json::from_value(payload.d.unwrap_or_default())?;
                if hello.heartbeat_interval == 0 {
                    return Err(Error::Gateway("hello with a zero heartbeat interval".into()));
                }
                let interval = Duration::from_millis(hello.heartbeat_interval);
                let login = if self.can_resume() {
                    Action::Resume
                } else {
                    Action::Identify
                };
                vec![Action::StartHeartbeat(interval), login]
            }
            Some(Opcode::HeartbeatAck) => vec![Action::Ack],
            Some(Opcode::Heartbeat) => vec![Action::BeatNow],
            Some(Opcode::Dispatch) => self.dispatch(payload.t, payload.d)?,
            Some(Opcode::Reconnect) => {
                info!("gateway requested a reconnect");
                vec![Action::Reconnect { resume: true }]
            }
            Some(Opcode::InvalidSession) => {
                let resumable = payload.d.and_then(|d| d.as_bool()).unwrap_or(false);
                warn!("session invalidated (resumable: {})", resumable);
                if !resumable {
                    self.clear();
                }
                vec![Action::Reconnect { resume: resumable }]
            }
            Some(op) => {
                debug!("ignoring send-only opcode {:?}", op);
                Vec::new()
            }
            None => {
                debug!("ignoring unknown opcode {}", payload.op);
                Vec::new()
            }
        };
        Ok(actions)
    }

    fn dispatch(&mut self, name: Option<String>, data: Option<Value>) -> Result<Vec<Action>> {
        let name = name.ok_or_else(|| Error::Gateway("dispatch without event name".into()))?;
        let data = data.unwrap_or_default();

        let actions = match name.as_str() {
            "READY" => {
                let ready: Ready = serde_json::from_value(data.clone())?;
                self.session_id = Some(ready.session_id.clone());
                self.resume_url = Some(ready.resume_gateway_url.clone());
                vec![
                    Action::Ready(Box::new(ready)),
                    Action::Dispatch { name, data },
                ]
            }
            "RESUMED" => vec![Action::Resumed],
            _ => vec![Action::Dispatch { name, data }],
        };
        Ok(actions)
    }
}
