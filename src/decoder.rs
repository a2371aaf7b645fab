//! ABI-based log decoding
//!
//! `LogDecoder` maps event method ids (keccak-256 of the canonical
//! signature, 64 hex chars) to parsed event descriptors and decodes raw
//! logs into `DecodedEvent`s: non-indexed parameters from the data payload,
//! indexed parameters from `topics[1..]`, merged back in declaration order.

use crate::error::DecodeError;
use crate::normalize::{normalize_address, normalize_address_param, normalize_hash, strip_0x};
use crate::records::{DecodedEvent, EventParam, ParamValue};
use crate::types::RawLog;
use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// One entry of a JSON contract ABI.
///
/// Functions share the shape of events; fields we don't use (`outputs`,
/// `constant`, `stateMutability`...) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<EventInput>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInput {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub indexed: bool,
    /// Member types of `tuple` / `tuple[]` inputs
    #[serde(default)]
    pub components: Vec<EventInput>,
}

impl EventInput {
    /// Solidity type string, with tuples expanded to `(t1,t2,...)`.
    fn type_string(&self) -> String {
        match self.ty.strip_prefix("tuple") {
            Some(suffix) => {
                let members: Vec<String> = self.components.iter().map(Self::type_string).collect();
                format!("({}){}", members.join(","), suffix)
            }
            None => self.ty.clone(),
        }
    }

    fn parse_type(&self) -> Result<DynSolType, DecodeError> {
        let ty = self.type_string();
        DynSolType::parse(&ty)
            .map_err(|e| DecodeError::Abi(format!("unsupported type '{}': {}", ty, e)))
    }
}

impl EventDescriptor {
    /// True for `"type": "event"` entries (and entries without a type).
    pub fn is_event(&self) -> bool {
        self.kind.as_deref().map_or(true, |kind| kind == "event")
    }

    fn named(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }

    /// `name(type1,type2,...)` with canonical type names, `None` for unnamed entries.
    pub fn canonical_signature(&self) -> Result<Option<String>, DecodeError> {
        let Some(name) = self.named() else {
            return Ok(None);
        };
        let mut types = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            types.push(input.parse_type()?.sol_type_name().into_owned());
        }
        Ok(Some(format!("{}({})", name, types.join(","))))
    }

    /// Keccak-256 of the canonical signature as 64 lowercase hex chars.
    pub fn method_id(&self) -> Result<Option<String>, DecodeError> {
        Ok(self
            .canonical_signature()?
            .map(|signature| hex::encode(keccak256(signature.as_bytes()))))
    }
}

/// Parse a JSON ABI array.
pub fn parse_abi(json: &str) -> Result<Vec<EventDescriptor>, DecodeError> {
    serde_json::from_str(json).map_err(|e| DecodeError::Abi(format!("invalid ABI JSON: {}", e)))
}

#[derive(Debug, Clone)]
struct ParsedInput {
    name: String,
    ty: DynSolType,
    indexed: bool,
}

#[derive(Debug, Clone)]
struct RegisteredMethod {
    name: String,
    inputs: Vec<ParsedInput>,
}

/// Registry of event methods keyed by method id.
#[derive(Debug, Clone, Default)]
pub struct LogDecoder {
    methods: HashMap<String, RegisteredMethod>,
}

impl LogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a decoder with a single ABI registered.
    pub fn from_abi(descriptors: &[EventDescriptor]) -> Result<Self, DecodeError> {
        let mut decoder = Self::new();
        decoder.register(descriptors)?;
        Ok(decoder)
    }

    /// Register every named descriptor. Returns how many new method ids were added.
    ///
    /// Re-registering a known method id is a no-op.
    pub fn register(&mut self, descriptors: &[EventDescriptor]) -> Result<usize, DecodeError> {
        let mut added = 0;
        for descriptor in descriptors {
            let Some(method_id) = descriptor.method_id()? else {
                continue;
            };
            if self.methods.contains_key(&method_id) {
                continue;
            }
            let inputs = descriptor
                .inputs
                .iter()
                .map(|input| {
                    Ok(ParsedInput {
                        name: input.name.clone(),
                        ty: input.parse_type()?,
                        indexed: input.indexed,
                    })
                })
                .collect::<Result<Vec<_>, DecodeError>>()?;
            let name = descriptor.named().unwrap_or_default().to_string();
            debug!(method_id = %method_id, name = %name, "Registered ABI method");
            self.methods.insert(method_id, RegisteredMethod { name, inputs });
            added += 1;
        }
        Ok(added)
    }

    /// Remove the given descriptors. Unknown or malformed entries are ignored.
    pub fn unregister(&mut self, descriptors: &[EventDescriptor]) {
        for descriptor in descriptors {
            if let Ok(Some(method_id)) = descriptor.method_id() {
                self.methods.remove(&method_id);
            }
        }
    }

    /// Forget every registered method.
    pub fn reset(&mut self) {
        self.methods.clear();
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn contains(&self, method_id: &str) -> bool {
        self.methods.contains_key(&strip_0x(method_id).to_ascii_lowercase())
    }

    /// Decode one log.
    ///
    /// Fails with `UnknownTopic` if the first topic is not a registered method id.
    pub fn decode(&self, log: &RawLog) -> Result<DecodedEvent, DecodeError> {
        let topic0 = log
            .topics
            .first()
            .map(|topic| strip_0x(topic).to_ascii_lowercase())
            .unwrap_or_default();
        let method = self
            .methods
            .get(&topic0)
            .ok_or_else(|| DecodeError::UnknownTopic(topic0.clone()))?;

        let contract_address = normalize_address(log.address.as_ref())?;
        let transaction_hash = normalize_hash(log.transaction_hash.as_ref())?;

        let data_types: Vec<DynSolType> = method
            .inputs
            .iter()
            .filter(|input| !input.indexed)
            .map(|input| input.ty.clone())
            .collect();
        let data_values = if data_types.is_empty() {
            Vec::new()
        } else {
            match DynSolType::Tuple(data_types).abi_decode_params(&log.data) {
                Ok(DynSolValue::Tuple(values)) => values,
                Ok(other) => vec![other],
                Err(e) => return Err(DecodeError::Abi(format!("{} data: {}", method.name, e))),
            }
        };
        let mut data_values = data_values.into_iter();

        let mut topics = log.topics.iter().skip(1);
        let mut params = Vec::with_capacity(method.inputs.len());
        for input in &method.inputs {
            let value = if input.indexed {
                let topic = topics.next().ok_or_else(|| {
                    DecodeError::validation(format!(
                        "{}: missing topic for indexed parameter '{}'",
                        method.name, input.name
                    ))
                })?;
                decode_topic(topic, &input.ty)?
            } else {
                let value = data_values.next().ok_or_else(|| {
                    DecodeError::Abi(format!("{}: missing data for '{}'", method.name, input.name))
                })?;
                to_param_value(value)
            };
            params.push(EventParam {
                name: input.name.clone(),
                value,
            });
        }

        Ok(DecodedEvent {
            contract_address,
            event_name: method.name.clone(),
            transaction_hash,
            params,
        })
    }

    /// Decode every log with a registered topic, in order.
    ///
    /// Logs with unknown topics are dropped; any other error is returned.
    pub fn decode_many<'a, I>(&self, logs: I) -> Result<Vec<DecodedEvent>, DecodeError>
    where
        I: IntoIterator<Item = &'a RawLog>,
    {
        let mut decoded = Vec::new();
        for log in logs {
            match self.decode(log) {
                Ok(event) => decoded.push(event),
                Err(DecodeError::UnknownTopic(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(decoded)
    }
}

/// Decode one indexed parameter from its 32-byte topic.
///
/// Reference types are stored on chain as the keccak-256 of their value, so
/// only the raw topic can be returned for them.
fn decode_topic(topic: &str, ty: &DynSolType) -> Result<ParamValue, DecodeError> {
    if matches!(ty, DynSolType::Address) {
        return normalize_address_param(topic).map(ParamValue::Address);
    }
    let word = hex::decode(strip_0x(topic))
        .map_err(|e| DecodeError::validation(format!("topic is not hex: {}", e)))?;
    if word.len() != 32 {
        return Err(DecodeError::validation(format!(
            "topic must be 32 bytes, got {}",
            word.len()
        )));
    }
    match ty {
        DynSolType::String
        | DynSolType::Bytes
        | DynSolType::Array(_)
        | DynSolType::FixedArray(_, _)
        | DynSolType::Tuple(_) => Ok(ParamValue::Bytes(word)),
        _ => ty
            .abi_decode(&word)
            .map(to_param_value)
            .map_err(|e| DecodeError::Abi(format!("topic decode: {}", e))),
    }
}

/// Convert a decoded ABI value, normalizing addresses to unprefixed lowercase hex.
fn to_param_value(value: DynSolValue) -> ParamValue {
    match value {
        DynSolValue::Bool(b) => ParamValue::Bool(b),
        DynSolValue::Int(i, _) => ParamValue::Int(i.to_string()),
        DynSolValue::Uint(u, _) => ParamValue::Uint(u.to_string()),
        DynSolValue::FixedBytes(word, size) => ParamValue::Bytes(word.as_slice()[..size].to_vec()),
        DynSolValue::Address(a) => ParamValue::Address(hex::encode(a)),
        DynSolValue::Function(f) => ParamValue::Bytes(f.to_vec()),
        DynSolValue::Bytes(b) => ParamValue::Bytes(b),
        DynSolValue::String(s) => ParamValue::String(s),
        DynSolValue::Array(values)
        | DynSolValue::FixedArray(values)
        | DynSolValue::Tuple(values) => {
            ParamValue::Array(values.into_iter().map(to_param_value).collect())
        }
    }
}
