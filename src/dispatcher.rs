use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{JudgeError, Result};
use crate::judge::JudgeServer;

/// Header carrying the shared secret
pub const TOKEN_HEADER: &str = "X-Judge-Server-Token";

/// The operations a caller may name; anything else is not found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Ping,
    Judge,
    CompileSpj,
}

impl Operation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ping" => Some(Self::Ping),
            "judge" => Some(Self::Judge),
            "compile_spj" => Some(Self::CompileSpj),
            _ => None,
        }
    }
}

/// Uniform response body: `err` is null on success, otherwise the error kind
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub err: Option<&'static str>,
    pub data: Value,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self { err: None, data }
    }

    pub fn from_error(err: &JudgeError) -> Self {
        Self {
            err: Some(err.kind()),
            data: Value::String(err.to_string()),
        }
    }

    pub fn not_found() -> Self {
        Self::from_error(&JudgeError::InvalidRequest("404".to_string()))
    }
}

/// Authenticates, decodes and routes one request to the judge
pub struct Dispatcher {
    token: String,
    server: JudgeServer,
}

impl Dispatcher {
    pub fn new(token: impl Into<String>, server: JudgeServer) -> Self {
        Self {
            token: token.into(),
            server,
        }
    }

    /// Handles one call; never fails, every outcome is an [`Envelope`]
    pub fn dispatch(&self, operation: &str, token: Option<&str>, body: &[u8]) -> Envelope {
        let Some(operation) = Operation::from_name(operation) else {
            return Envelope::not_found();
        };

        match self.handle(operation, token, body) {
            Ok(data) => Envelope::ok(data),
            Err(e) => {
                match &e {
                    JudgeError::TokenVerificationFailed(_)
                    | JudgeError::Compile(_)
                    | JudgeError::SpjCompile(_) => {
                        log::warn!("{operation:?} failed with {}: {e}", e.kind())
                    }
                    _ => log::error!("{operation:?} failed with {}: {e}", e.kind()),
                }
                Envelope::from_error(&e)
            }
        }
    }

    fn handle(&self, operation: Operation, token: Option<&str>, body: &[u8]) -> Result<Value> {
        if token != Some(self.token.as_str()) {
            return Err(JudgeError::TokenVerificationFailed(
                "invalid token".to_string(),
            ));
        }

        let params = decode_params(body);
        match operation {
            Operation::Ping => Ok(self.server.ping()),
            Operation::Judge => {
                let request = serde_json::from_value(params)?;
                Ok(serde_json::to_value(self.server.judge(request)?)?)
            }
            Operation::CompileSpj => {
                let request = serde_json::from_value(params)?;
                Ok(self.server.compile_spj(request)?.into())
            }
        }
    }
}

/// Malformed or absent bodies count as an empty parameter set
fn decode_params(body: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(params @ Value::Object(_)) => params,
        _ => Value::Object(Map::new()),
    }
}
