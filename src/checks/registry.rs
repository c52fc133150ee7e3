//! Schema-checked conversion between check records and [`CheckSpec`]s
//!
//! A record is the JSON object a check travels as inside a configuration
//! message. Decoding rejects unknown types, unknown fields and missing
//! fields before any value is interpreted, then enforces value bounds.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use super::spec::{
    DnsCheck, EchoCheck, HttpCheck, HttpsCheck, IcmpCheck, NetworkTarget, NtpCheck, TcpCheck,
    UdpCheck,
};
use super::{CheckSpec, CheckType, DecodeError};

/// Builds a [`CheckSpec`] from its type tag and field record.
pub fn decode(tag: &str, fields: &Map<String, Value>) -> Result<CheckSpec, DecodeError> {
    let check_type =
        CheckType::from_tag(tag).ok_or_else(|| DecodeError::UnknownType(tag.to_string()))?;
    let declared = check_type.fields();

    if let Some(field) = fields.keys().find(|key| !declared.contains(&key.as_str())) {
        return Err(DecodeError::UnknownField {
            check_type,
            field: field.clone(),
        });
    }

    if let Some(field) = declared.iter().copied().find(|field| !fields.contains_key(*field)) {
        return Err(DecodeError::MissingField { check_type, field });
    }

    let record = Value::Object(fields.clone());
    let spec = match check_type {
        CheckType::Http => CheckSpec::Http(from_record(check_type, record)?),
        CheckType::Https => CheckSpec::Https(from_record(check_type, record)?),
        CheckType::Icmp => CheckSpec::Icmp(from_record(check_type, record)?),
        CheckType::Dns => CheckSpec::Dns(from_record(check_type, record)?),
        CheckType::Ntp => CheckSpec::Ntp(from_record(check_type, record)?),
        CheckType::Tcp => CheckSpec::Tcp(from_record(check_type, record)?),
        CheckType::Udp => CheckSpec::Udp(from_record(check_type, record)?),
        CheckType::Echo => CheckSpec::Echo(from_record(check_type, record)?),
    };

    spec.validate()?;
    Ok(spec)
}

/// Turns a [`CheckSpec`] back into the record its type declares.
pub fn encode(spec: &CheckSpec) -> Map<String, Value> {
    match spec {
        CheckSpec::Http(HttpCheck { url, interval }) => {
            record([("url", json!(url)), ("interval", json!(interval))])
        }
        CheckSpec::Https(HttpsCheck {
            url,
            timeout,
            interval,
        }) => record([
            ("url", json!(url)),
            ("timeout", json!(timeout)),
            ("interval", json!(interval)),
        ]),
        CheckSpec::Icmp(IcmpCheck {
            host,
            ttl,
            timeout,
            sequence_number,
            interval,
        }) => record([
            ("host", json!(host)),
            ("ttl", json!(ttl)),
            ("timeout", json!(timeout)),
            ("sequence_number", json!(sequence_number)),
            ("interval", json!(interval)),
        ]),
        CheckSpec::Dns(DnsCheck {
            server,
            query,
            record_type,
            interval,
        }) => record([
            ("server", json!(server)),
            ("query", json!(query)),
            ("record_type", json!(record_type)),
            ("interval", json!(interval)),
        ]),
        CheckSpec::Ntp(NtpCheck { server, interval }) => {
            record([("server", json!(server)), ("interval", json!(interval))])
        }
        CheckSpec::Tcp(TcpCheck { target, interval })
        | CheckSpec::Echo(EchoCheck { target, interval }) => {
            let mut fields = target_record(target);
            fields.insert("interval".to_string(), json!(interval));
            fields
        }
        CheckSpec::Udp(UdpCheck {
            target,
            timeout,
            interval,
        }) => {
            let mut fields = target_record(target);
            fields.insert("timeout".to_string(), json!(timeout));
            fields.insert("interval".to_string(), json!(interval));
            fields
        }
    }
}

fn from_record<T: DeserializeOwned>(
    check_type: CheckType,
    record: Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(record).map_err(|e| DecodeError::InvalidValue {
        check_type,
        reason: e.to_string(),
    })
}

fn record<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn target_record(target: &NetworkTarget) -> Map<String, Value> {
    record([
        ("ip_address", json!(target.ip_address)),
        ("port", json!(target.port)),
    ])
}

/// The checks one agent runs, grouped by type in configuration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentConfig {
    checks: BTreeMap<CheckType, Vec<CheckSpec>>,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, spec: CheckSpec) {
        self.checks.entry(spec.check_type()).or_default().push(spec);
    }

    pub fn with(mut self, spec: CheckSpec) -> Self {
        self.push(spec);
        self
    }

    /// All checks, grouped by type
    pub fn iter(&self) -> impl Iterator<Item = &CheckSpec> {
        self.checks.values().flatten()
    }

    pub fn of_type(&self, check_type: CheckType) -> &[CheckSpec] {
        self.checks
            .get(&check_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.checks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes the body of a configuration message.
    ///
    /// Types mapped to `null` or an empty list contribute no checks.
    pub fn from_wire(message: &Value) -> Result<Self, DecodeError> {
        let entries = match message {
            Value::Null => return Ok(Self::default()),
            Value::Object(entries) => entries,
            other => {
                return Err(DecodeError::Malformed(format!(
                    "expected an object keyed by check type, got {}",
                    kind(other)
                )));
            }
        };

        let mut config = Self::default();
        for (tag, records) in entries {
            let records = match records {
                Value::Null => continue,
                Value::Array(records) => records,
                other => {
                    return Err(DecodeError::Malformed(format!(
                        "checks of type `{tag}` must be a list, got {}",
                        kind(other)
                    )));
                }
            };

            for record in records {
                let Value::Object(fields) = record else {
                    return Err(DecodeError::Malformed(format!(
                        "`{tag}` check must be an object, got {}",
                        kind(record)
                    )));
                };
                config.push(decode(tag, fields)?);
            }
        }

        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let message: Value = serde_json::from_str(text)?;
        Self::from_wire(&message)
    }

    /// Encodes the configuration as a message body; types without checks are omitted.
    pub fn to_wire(&self) -> Value {
        let entries = self
            .checks
            .iter()
            .filter(|(_, specs)| !specs.is_empty())
            .map(|(check_type, specs)| {
                let records = specs.iter().map(|spec| Value::Object(encode(spec))).collect();
                (check_type.tag().to_string(), Value::Array(records))
            })
            .collect();

        Value::Object(entries)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

impl Serialize for AgentConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AgentConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let message = Value::deserialize(deserializer)?;
        Self::from_wire(&message).map_err(D::Error::custom)
    }
}

impl fmt::Display for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (check_type, specs) in &self.checks {
            writeln!(f, "    {check_type} checks")?;
            for (n, spec) in specs.iter().enumerate() {
                writeln!(f, "        --------------------")?;
                writeln!(f, "        Check {}", n + 1)?;
                for (field, value) in encode(spec) {
                    writeln!(f, "          {field}: {value}")?;
                }
            }
        }
        Ok(())
    }
}
