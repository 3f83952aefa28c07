use crate::cluster::{ClusterJoinCheck, JoinCheckResult, JoinCheckResultBuilder, JoinRequest, PassivationTarget};
use crate::core::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// A value both nodes must agree on before merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementValue {
    Flag(bool),
    Number(i64),
    Text(String),
    Version { major: u32, minor: u32, patch: u32 },
}

impl RequirementValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Flag(_) => "flag",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Version { .. } => "version",
        }
    }

    pub fn encode(&self) -> Result<EncodedRequirement> {
        let payload = match self {
            Self::Flag(value) => rmp_serde::to_vec(value)?,
            Self::Number(value) => rmp_serde::to_vec(value)?,
            Self::Text(value) => rmp_serde::to_vec(value)?,
            Self::Version { major, minor, patch } => rmp_serde::to_vec(&(major, minor, patch))?,
        };
        Ok(EncodedRequirement {
            type_name: self.type_name().to_string(),
            payload,
        })
    }
}

impl fmt::Display for RequirementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{value}'"),
            Self::Version { major, minor, patch } => write!(f, "{major}.{minor}.{patch}"),
        }
    }
}

/// Wire form of a requirement: the type tag plus its MessagePack payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedRequirement {
    pub type_name: String,
    pub payload: Vec<u8>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown requirement type '{0}'")]
    UnknownType(String),

    #[error("malformed '{type_name}' payload: {reason}")]
    Malformed { type_name: String, reason: String },
}

type Decoder = fn(&str, &[u8]) -> std::result::Result<RequirementValue, DecodeError>;

fn decode_payload<T: DeserializeOwned>(
    type_name: &str,
    payload: &[u8],
) -> std::result::Result<T, DecodeError> {
    rmp_serde::from_slice(payload).map_err(|e| DecodeError::Malformed {
        type_name: type_name.to_string(),
        reason: e.to_string(),
    })
}

/// Requirement types this node knows how to decode.
#[derive(Clone)]
pub struct RequirementTypes {
    decoders: HashMap<&'static str, Decoder>,
}

impl Default for RequirementTypes {
    fn default() -> Self {
        let mut decoders: HashMap<&'static str, Decoder> = HashMap::new();
        decoders.insert("flag", |t, p| decode_payload(t, p).map(RequirementValue::Flag));
        decoders.insert("number", |t, p| decode_payload(t, p).map(RequirementValue::Number));
        decoders.insert("text", |t, p| decode_payload(t, p).map(RequirementValue::Text));
        decoders.insert("version", |t, p| {
            decode_payload::<(u32, u32, u32)>(t, p)
                .map(|(major, minor, patch)| RequirementValue::Version { major, minor, patch })
        });
        Self { decoders }
    }
}

impl RequirementTypes {
    /// Forgets a type, as a node built before it existed would.
    pub fn without(mut self, type_name: &str) -> Self {
        self.decoders.remove(type_name);
        self
    }

    pub fn decode(
        &self,
        encoded: &EncodedRequirement,
    ) -> std::result::Result<RequirementValue, DecodeError> {
        let decoder = self
            .decoders
            .get(encoded.type_name.as_str())
            .ok_or_else(|| DecodeError::UnknownType(encoded.type_name.clone()))?;
        decoder(&encoded.type_name, &encoded.payload)
    }
}

/// Compares the named requirements each node advertises.
pub struct RequirementsCheck {
    requirements: BTreeMap<String, RequirementValue>,
    types: RequirementTypes,
}

impl RequirementsCheck {
    pub const NAME: &'static str = "requirements";

    pub fn new(requirements: BTreeMap<String, RequirementValue>) -> Self {
        Self {
            requirements,
            types: RequirementTypes::default(),
        }
    }

    pub fn with_types(mut self, types: RequirementTypes) -> Self {
        self.types = types;
        self
    }

    pub fn require(mut self, name: impl Into<String>, value: RequirementValue) -> Self {
        self.requirements.insert(name.into(), value);
        self
    }

    fn encoded(&self) -> Result<BTreeMap<String, EncodedRequirement>> {
        self.requirements
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.encode()?)))
            .collect()
    }

    /// Every discrepancy adds its own reason; any of them passivates.
    pub fn compare(&self, remote: &BTreeMap<String, EncodedRequirement>) -> JoinCheckResult {
        let mut builder = JoinCheckResultBuilder::default();

        for (name, local) in &self.requirements {
            let Some(encoded) = remote.get(name) else {
                builder.passivate(
                    PassivationTarget::AnyNode,
                    format!("Peer does not advertise requirement '{name}'"),
                );
                continue;
            };
            match self.types.decode(encoded) {
                Ok(value) if value == *local => {}
                Ok(value) => {
                    builder.passivate(
                        PassivationTarget::AnyNode,
                        format!("Requirement '{name}' differs: local {local}, peer {value}"),
                    );
                }
                Err(err) => {
                    builder.passivate(
                        PassivationTarget::AnyNode,
                        format!("Requirement '{name}' from peer cannot be read: {err}"),
                    );
                }
            }
        }

        for name in remote.keys().filter(|name| !self.requirements.contains_key(*name)) {
            builder.passivate(
                PassivationTarget::AnyNode,
                format!("Peer requires '{name}' which this node does not advertise"),
            );
        }

        builder.build()
    }
}

#[async_trait]
impl ClusterJoinCheck for RequirementsCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn order(&self) -> i32 {
        10
    }

    async fn accept(&self, request: &mut JoinRequest) -> Result<JoinCheckResult> {
        let remote: BTreeMap<String, EncodedRequirement> = request.receive().await?;
        request.send(&self.encoded()?).await?;
        Ok(self.compare(&remote))
    }

    async fn connect(&self, request: &mut JoinRequest) -> Result<JoinCheckResult> {
        request.send(&self.encoded()?).await?;
        let remote: BTreeMap<String, EncodedRequirement> = request.receive().await?;
        Ok(self.compare(&remote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check() -> RequirementsCheck {
        RequirementsCheck::new(BTreeMap::new())
            .require("schema", RequirementValue::Version { major: 2, minor: 4, patch: 0 })
            .require("clustered", RequirementValue::Flag(true))
    }

    #[test]
    fn identical_requirements_pass() {
        let local = check();
        assert_eq!(local.compare(&check().encoded().unwrap()), JoinCheckResult::Ok);
    }

    #[test]
    fn each_discrepancy_adds_a_reason() {
        let remote = RequirementsCheck::new(BTreeMap::new())
            .require("schema", RequirementValue::Version { major: 2, minor: 5, patch: 0 })
            .require("region", RequirementValue::Text("eu".into()))
            .encoded()
            .unwrap();

        let result = check().compare(&remote);
        assert!(matches!(
            result,
            JoinCheckResult::Passivate { target: PassivationTarget::AnyNode, .. }
        ));
        // schema differs, clustered missing, region unknown locally
        assert_eq!(result.reasons().len(), 3);
    }

    #[test]
    fn undecodable_payload_passivates_instead_of_failing() {
        let local = check().with_types(RequirementTypes::default().without("version"));
        let result = local.compare(&check().encoded().unwrap());
        assert_eq!(result.reasons().len(), 1);
        assert!(result.reasons()[0].contains("unknown requirement type 'version'"));

        let garbage = EncodedRequirement {
            type_name: "number".into(),
            payload: vec![0xc1],
        };
        assert!(matches!(
            RequirementTypes::default().decode(&garbage),
            Err(DecodeError::Malformed { .. })
        ));
    }
}
