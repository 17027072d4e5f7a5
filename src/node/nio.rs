//! Network I/O endpoints bound to node adapters

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ControllerError, Result};

/// Kinds accepted by [`Nio::from_spec`]
pub const NIO_KINDS: &[&str] = &[
    "nio_udp",
    "nio_tap",
    "nio_generic_ethernet",
    "nio_internal",
    "nio_null",
];

/// Concrete NIO binding, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Nio {
    /// UDP tunnel to another endpoint
    #[serde(rename = "nio_udp")]
    Udp {
        lport: u16,
        rhost: String,
        rport: u16,
    },
    #[serde(rename = "nio_tap")]
    Tap { tap_device: String },
    #[serde(rename = "nio_generic_ethernet")]
    GenericEthernet { ethernet_device: String },
    /// Loopback inside the engine
    #[serde(rename = "nio_internal")]
    Internal,
    /// Sink that drops everything
    #[serde(rename = "nio_null")]
    Null,
}

impl Nio {
    /// Build a NIO from a caller-supplied JSON description
    ///
    /// Fails with a validation error for unknown kinds, missing or mistyped
    /// fields, zero ports and empty device or host names.
    pub fn from_spec(spec: &Value) -> Result<Self> {
        let kind = spec
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ControllerError::Validation("NIO type is missing".to_string()))?;

        if !NIO_KINDS.contains(&kind) {
            return Err(ControllerError::Validation(format!(
                "NIO of type {} is not supported",
                kind
            )));
        }

        let nio: Nio = serde_json::from_value(spec.clone())
            .map_err(|e| ControllerError::Validation(format!("Invalid {}: {}", kind, e)))?;
        nio.validate()?;
        Ok(nio)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Nio::Udp {
                lport,
                rhost,
                rport,
            } => {
                if *lport == 0 || *rport == 0 {
                    return Err(ControllerError::Validation(
                        "UDP ports must be between 1 and 65535".to_string(),
                    ));
                }
                if rhost.trim().is_empty() {
                    return Err(ControllerError::Validation(
                        "UDP remote host cannot be empty".to_string(),
                    ));
                }
            }
            Nio::Tap { tap_device } if tap_device.trim().is_empty() => {
                return Err(ControllerError::Validation(
                    "TAP device name cannot be empty".to_string(),
                ));
            }
            Nio::GenericEthernet { ethernet_device } if ethernet_device.trim().is_empty() => {
                return Err(ControllerError::Validation(
                    "Ethernet device name cannot be empty".to_string(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Wire tag of this NIO
    pub fn kind(&self) -> &'static str {
        match self {
            Nio::Udp { .. } => "nio_udp",
            Nio::Tap { .. } => "nio_tap",
            Nio::GenericEthernet { .. } => "nio_generic_ethernet",
            Nio::Internal => "nio_internal",
            Nio::Null => "nio_null",
        }
    }

    /// JSON body sent to the engine
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| ControllerError::Validation(format!("Cannot encode {}: {}", self.kind(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_udp_from_spec() {
        let nio = Nio::from_spec(&json!({
            "type": "nio_udp",
            "lport": 4242,
            "rport": 4243,
            "rhost": "127.0.0.1"
        }))
        .unwrap();

        assert_eq!(
            nio,
            Nio::Udp {
                lport: 4242,
                rhost: "127.0.0.1".to_string(),
                rport: 4243
            }
        );
        assert_eq!(nio.kind(), "nio_udp");
        assert_eq!(
            nio.to_value().unwrap(),
            json!({"type": "nio_udp", "lport": 4242, "rhost": "127.0.0.1", "rport": 4243})
        );
    }

    #[test]
    fn test_unit_kinds() {
        let nio = Nio::from_spec(&json!({"type": "nio_null"})).unwrap();
        assert_eq!(nio, Nio::Null);
        assert_eq!(nio.to_value().unwrap(), json!({"type": "nio_null"}));

        let nio = Nio::from_spec(&json!({"type": "nio_internal"})).unwrap();
        assert_eq!(nio, Nio::Internal);
    }

    #[test]
    fn test_tap_and_ethernet() {
        let nio = Nio::from_spec(&json!({"type": "nio_tap", "tap_device": "tap0"})).unwrap();
        assert_eq!(
            nio,
            Nio::Tap {
                tap_device: "tap0".to_string()
            }
        );

        let nio = Nio::from_spec(&json!({
            "type": "nio_generic_ethernet",
            "ethernet_device": "eth0"
        }))
        .unwrap();
        assert_eq!(nio.kind(), "nio_generic_ethernet");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = Nio::from_spec(&json!({"type": "nio_unix", "path": "/tmp/x"})).unwrap_err();
        assert!(matches!(err, ControllerError::Validation(ref m) if m.contains("nio_unix")));
    }

    #[test]
    fn test_missing_type_rejected() {
        let err = Nio::from_spec(&json!({"lport": 1})).unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[test]
    fn test_missing_field_rejected() {
        let err = Nio::from_spec(&json!({"type": "nio_udp", "lport": 4242})).unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(Nio::from_spec(&json!({
            "type": "nio_udp", "lport": 0, "rhost": "127.0.0.1", "rport": 4243
        }))
        .is_err());
        assert!(Nio::from_spec(&json!({
            "type": "nio_udp", "lport": 70000, "rhost": "127.0.0.1", "rport": 4243
        }))
        .is_err());
        assert!(Nio::from_spec(&json!({
            "type": "nio_udp", "lport": 1, "rhost": " ", "rport": 2
        }))
        .is_err());
        assert!(Nio::from_spec(&json!({"type": "nio_tap", "tap_device": ""})).is_err());
    }
}
