//! Encoding of catalog messages for the worker transport, and the handshake
//! line a worker prints once it is listening.

use std::fmt;
use std::net::SocketAddr;

use crate::catalog::{Request, Response};
use crate::error::{EngineError, ErrorCode};
use crate::proto;

/// Bumped whenever the payload encoding or handshake changes shape.
pub const PROTOCOL_VERSION: u32 = 1;

const HANDSHAKE_PREFIX: &str = "DOCGATE";

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug)]
pub enum WireError {
    Json(serde_json::Error),
    MissingOutcome,
    OperationMismatch { declared: String, actual: String },
    Handshake(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Json(e) => write!(f, "JSON error: {}", e),
            WireError::MissingOutcome => write!(f, "Reply carries neither payload nor failure"),
            WireError::OperationMismatch { declared, actual } => write!(
                f,
                "Envelope declares {} but payload is {}",
                declared, actual
            ),
            WireError::Handshake(line) => write!(f, "Malformed handshake: {:?}", line),
        }
    }
}

impl std::error::Error for WireError {}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Json(e)
    }
}

// ============================================================================
// Invoke envelope
// ============================================================================

pub fn encode_request(request: &Request, sequence: u64) -> Result<proto::InvokeRequest, WireError> {
    Ok(proto::InvokeRequest {
        operation: request.operation().name().to_string(),
        payload: serde_json::to_vec(request)?,
        sequence,
    })
}

pub fn decode_request(message: &proto::InvokeRequest) -> Result<Request, WireError> {
    let request: Request = serde_json::from_slice(&message.payload)?;
    if request.operation().name() != message.operation {
        return Err(WireError::OperationMismatch {
            declared: message.operation.clone(),
            actual: request.operation().name().to_string(),
        });
    }
    Ok(request)
}

pub fn encode_reply(
    sequence: u64,
    outcome: &Result<Response, EngineError>,
) -> Result<proto::InvokeReply, WireError> {
    let outcome = match outcome {
        Ok(response) => proto::invoke_reply::Outcome::Payload(serde_json::to_vec(response)?),
        Err(e) => proto::invoke_reply::Outcome::Failure(proto::EngineFailure {
            code: e.code.as_str().to_string(),
            message: e.message.clone(),
        }),
    };
    Ok(proto::InvokeReply {
        sequence,
        outcome: Some(outcome),
    })
}

/// Outer error is a transport problem, inner error is the engine's answer.
pub fn decode_reply(
    reply: proto::InvokeReply,
) -> Result<Result<Response, EngineError>, WireError> {
    match reply.outcome {
        Some(proto::invoke_reply::Outcome::Payload(payload)) => {
            Ok(Ok(serde_json::from_slice(&payload)?))
        }
        Some(proto::invoke_reply::Outcome::Failure(failure)) => Ok(Err(EngineError::new(
            ErrorCode::parse(&failure.code),
            failure.message,
        ))),
        None => Err(WireError::MissingOutcome),
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// First stdout line of a worker: `DOCGATE|<version>|tcp|<addr>|grpc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub version: u32,
    pub addr: SocketAddr,
}

impl Handshake {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            addr,
        }
    }

    pub fn parse(line: &str) -> Result<Self, WireError> {
        let malformed = || WireError::Handshake(line.to_string());
        let parts: Vec<&str> = line.trim().split('|').collect();
        match parts.as_slice() {
            [HANDSHAKE_PREFIX, version, "tcp", addr, "grpc"] => Ok(Self {
                version: version.parse().map_err(|_| malformed())?,
                addr: addr.parse().map_err(|_| malformed())?,
            }),
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|tcp|{}|grpc", HANDSHAKE_PREFIX, self.version, self.addr)
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

/// Serde support for `Vec<u8>` as standard base64
pub mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// Serde support for `Option<Vec<u8>>` as nullable base64
pub mod base64_bytes_opt {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer
                .serialize_some(&base64::engine::general_purpose::STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Call;
    use crate::handles::{DocumentRef, InstanceId};
    use crate::{requests, responses};

    #[test]
    fn test_handshake_format() {
        let handshake = Handshake::new("127.0.0.1:50123".parse().unwrap());
        let line = handshake.to_string();
        assert_eq!(line, "DOCGATE|1|tcp|127.0.0.1:50123|grpc");
        assert_eq!(Handshake::parse(&format!("{}\n", line)).unwrap(), handshake);
    }

    #[test]
    fn test_handshake_rejects_noise() {
        assert!(Handshake::parse("listening on 127.0.0.1:1").is_err());
        assert!(Handshake::parse("DOCGATE|x|tcp|127.0.0.1:1|grpc").is_err());
    }

    #[test]
    fn test_decode_request_checks_declared_operation() {
        let document = DocumentRef::new(InstanceId::new(), 1);
        let request = requests::GetPageCount { document }.into_request();
        let mut message = encode_request(&request, 7).unwrap();
        assert_eq!(message.operation, "GetPageCount");
        assert!(decode_request(&message).is_ok());

        message.operation = "CloseDocument".to_string();
        assert!(matches!(
            decode_request(&message),
            Err(WireError::OperationMismatch { .. })
        ));
    }

    #[test]
    fn test_engine_failure_survives_reply() {
        let failure = EngineError::new(ErrorCode::Password, "password required");
        let reply = encode_reply(3, &Err(failure.clone())).unwrap();
        assert_eq!(reply.sequence, 3);
        assert_eq!(decode_reply(reply).unwrap().unwrap_err(), failure);
    }

    #[test]
    fn test_reply_without_outcome_is_wire_error() {
        let reply = proto::InvokeReply {
            sequence: 1,
            outcome: None,
        };
        assert!(matches!(decode_reply(reply), Err(WireError::MissingOutcome)));
    }

    #[test]
    fn test_optional_bytes_encode_as_null() {
        let saved = responses::SaveAsCopy {
            bytes: None,
            path: None,
        };
        let json = serde_json::to_value(&saved).unwrap();
        assert!(json["bytes"].is_null());
        let back: responses::SaveAsCopy = serde_json::from_value(json).unwrap();
        assert!(back.bytes.is_none());
    }
}
