//! Device connection string parsing
//!
//! Format:
//!
//! ```text
//! HostName=<iothub_host_name>;DeviceId=<device_id>;SharedAccessKey=<device_key>
//! ```
//!
//! `ModuleId` and `GatewayHostName` are optional. Exactly one credential is
//! required: `SharedAccessKey`, `SharedAccessSignature` or `x509=true`.
//! Secrets never appear in `Debug` or `Display` output.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{DiagError, Result};

const HOST_NAME: &str = "HostName";
const DEVICE_ID: &str = "DeviceId";
const MODULE_ID: &str = "ModuleId";
const GATEWAY_HOST_NAME: &str = "GatewayHostName";
const SHARED_ACCESS_KEY: &str = "SharedAccessKey";
const SHARED_ACCESS_SIGNATURE: &str = "SharedAccessSignature";
const X509: &str = "x509";

const REDACTED: &str = "<redacted>";

/// How the device authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    SharedAccessKey(String),
    SharedAccessSignature(String),
    X509,
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::SharedAccessKey(_) => SHARED_ACCESS_KEY,
            Credential::SharedAccessSignature(_) => SHARED_ACCESS_SIGNATURE,
            Credential::X509 => X509,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::X509 => f.write_str("X509"),
            other => write!(f, "{}({})", other.kind(), REDACTED),
        }
    }
}

/// Identity of the device session, parsed from a connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionIdentity {
    pub host_name: String,
    pub device_id: String,
    pub module_id: Option<String>,
    pub gateway_host_name: Option<String>,
    pub credential: Credential,
}

impl ConnectionIdentity {
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut fields: HashMap<&str, &str> = HashMap::new();

        for segment in connection_string.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            // Keys are base64 and may end in '=', so split on the first one only
            let (name, value) = segment.split_once('=').ok_or_else(|| {
                DiagError::connection_string("malformed segment, expected 'Name=value'")
            })?;
            let name = name.trim();

            if fields.insert(name, value.trim()).is_some() {
                return Err(DiagError::connection_string(format!("duplicate field '{}'", name)));
            }
        }

        let host_name = required(&fields, HOST_NAME)?;
        let device_id = required(&fields, DEVICE_ID)?;
        let module_id = optional(&fields, MODULE_ID);
        let gateway_host_name = optional(&fields, GATEWAY_HOST_NAME);
        let credential = credential(&fields)?;

        for name in fields.keys() {
            if ![
                HOST_NAME,
                DEVICE_ID,
                MODULE_ID,
                GATEWAY_HOST_NAME,
                SHARED_ACCESS_KEY,
                SHARED_ACCESS_SIGNATURE,
                X509,
            ]
            .contains(name)
            {
                debug!(field = %name, "Ignoring unknown connection string field");
            }
        }

        Ok(Self {
            host_name,
            device_id,
            module_id,
            gateway_host_name,
            credential,
        })
    }
}

impl FromStr for ConnectionIdentity {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={};{}={}", HOST_NAME, self.host_name, DEVICE_ID, self.device_id)?;
        if let Some(module_id) = &self.module_id {
            write!(f, ";{}={}", MODULE_ID, module_id)?;
        }
        if let Some(gateway) = &self.gateway_host_name {
            write!(f, ";{}={}", GATEWAY_HOST_NAME, gateway)?;
        }
        match self.credential {
            Credential::X509 => write!(f, ";{}=true", X509),
            ref other => write!(f, ";{}={}", other.kind(), REDACTED),
        }
    }
}

fn required(fields: &HashMap<&str, &str>, name: &str) -> Result<String> {
    match fields.get(name) {
        Some(value) if !value.is_empty() => Ok((*value).to_string()),
        Some(_) => Err(DiagError::connection_string(format!("'{}' is empty", name))),
        None => Err(DiagError::connection_string(format!("missing '{}'", name))),
    }
}

fn optional(fields: &HashMap<&str, &str>, name: &str) -> Option<String> {
    fields
        .get(name)
        .filter(|value| !value.is_empty())
        .map(|value| (*value).to_string())
}

fn credential(fields: &HashMap<&str, &str>) -> Result<Credential> {
    let key = optional(fields, SHARED_ACCESS_KEY).map(Credential::SharedAccessKey);
    let signature = optional(fields, SHARED_ACCESS_SIGNATURE).map(Credential::SharedAccessSignature);
    let x509 = match fields.get(X509) {
        None => None,
        Some(value) if value.eq_ignore_ascii_case("true") => Some(Credential::X509),
        Some(_) => {
            return Err(DiagError::connection_string(format!(
                "'{}' must be 'true' when present",
                X509
            )))
        }
    };

    let mut present = [key, signature, x509].into_iter().flatten();
    match (present.next(), present.next()) {
        (Some(credential), None) => Ok(credential),
        (None, _) => Err(DiagError::connection_string(format!(
            "missing credential, expected one of '{}', '{}' or '{}=true'",
            SHARED_ACCESS_KEY, SHARED_ACCESS_SIGNATURE, X509
        ))),
        (Some(_), Some(_)) => Err(DiagError::connection_string(
            "more than one credential supplied",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECTION_STRING: &str =
        "HostName=iothub.device.com;DeviceId=java;SharedAccessKey=NMNxZNArh+abc=";

    #[test]
    fn test_parse_shared_access_key() {
        let identity = ConnectionIdentity::parse(CONNECTION_STRING).unwrap();
        assert_eq!(identity.host_name, "iothub.device.com");
        assert_eq!(identity.device_id, "java");
        assert!(identity.module_id.is_none());
        assert_eq!(
            identity.credential,
            Credential::SharedAccessKey("NMNxZNArh+abc=".to_string())
        );
    }

    #[test]
    fn test_parse_x509_module() {
        let identity: ConnectionIdentity =
            "HostName=hub.example.net;DeviceId=cam-1;ModuleId=edge;x509=true;"
                .parse()
                .unwrap();
        assert_eq!(identity.module_id.as_deref(), Some("edge"));
        assert_eq!(identity.credential, Credential::X509);
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = ConnectionIdentity::parse("DeviceId=a;SharedAccessKey=k").unwrap_err();
        assert!(err.to_string().contains("HostName"));

        let err = ConnectionIdentity::parse("HostName=h;DeviceId=a").unwrap_err();
        assert!(err.to_string().contains("missing credential"));

        let err = ConnectionIdentity::parse("HostName=h;DeviceId=;SharedAccessKey=k").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_conflicting_or_malformed_rejected() {
        assert!(ConnectionIdentity::parse(
            "HostName=h;DeviceId=a;SharedAccessKey=k;SharedAccessSignature=s"
        )
        .is_err());
        assert!(ConnectionIdentity::parse("HostName=h;HostName=g;DeviceId=a;x509=true").is_err());
        assert!(ConnectionIdentity::parse("HostName=h;DeviceId=a;garbage").is_err());
        assert!(ConnectionIdentity::parse("HostName=h;DeviceId=a;x509=false").is_err());
    }

    #[test]
    fn test_secrets_never_rendered() {
        let identity = ConnectionIdentity::parse(CONNECTION_STRING).unwrap();
        let display = identity.to_string();
        let debug = format!("{:?}", identity);

        assert!(!display.contains("NMNxZNArh"));
        assert!(!debug.contains("NMNxZNArh"));
        assert_eq!(
            display,
            "HostName=iothub.device.com;DeviceId=java;SharedAccessKey=<redacted>"
        );
    }
}
