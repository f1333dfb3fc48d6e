//! Persisted form of an effect chain
//!
//! A chain is stored as a document with a chain-wide `bypass` flag and an
//! ordered `effects` list; list order is processing order. Reading is lenient:
//! unknown keys are ignored, flags accept booleans, integers or strings, entries
//! that are not tables are skipped, and an entry without an `id` still loads
//! (as an effect that cannot be resolved). JSON and TOML are both supported.

use crate::domain::effect::{EffectId, EffectParameters};
use serde::de::{Deserializer, IgnoredAny};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocumentError>;

/// Errors that can occur while reading or writing chain documents
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Whole chain: bypass flag plus ordered entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainDocument {
    #[serde(deserialize_with = "lenient_flag")]
    pub bypass: bool,

    #[serde(deserialize_with = "lenient_effects")]
    pub effects: Vec<EffectDocument>,
}

/// One chain slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectDocument {
    #[serde(deserialize_with = "lenient_id")]
    pub id: EffectId,

    #[serde(deserialize_with = "lenient_text")]
    pub version: String,

    #[serde(deserialize_with = "lenient_flag")]
    pub bypass: bool,

    #[serde(deserialize_with = "lenient_flag")]
    pub prefader: bool,

    #[serde(deserialize_with = "lenient_parameters")]
    pub parameters: EffectParameters,
}

impl ChainDocument {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Any scalar a hand-edited document might use
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Other(IgnoredAny),
}

impl Scalar {
    fn into_flag(self) -> bool {
        match self {
            Scalar::Bool(b) => b,
            Scalar::Int(n) => n != 0,
            Scalar::Float(x) => x != 0.0,
            Scalar::Text(s) => matches!(s.trim(), "1" | "true" | "True" | "TRUE" | "yes"),
            Scalar::Other(_) => false,
        }
    }

    fn into_text(self) -> Option<String> {
        match self {
            Scalar::Bool(b) => Some(b.to_string()),
            Scalar::Int(n) => Some(n.to_string()),
            Scalar::Float(x) => Some(x.to_string()),
            Scalar::Text(s) => Some(s),
            Scalar::Other(_) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Entry {
    Effect(EffectDocument),
    Other(IgnoredAny),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Seq<T> {
    Items(Vec<T>),
    Other(IgnoredAny),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Table {
    Entries(std::collections::BTreeMap<String, Scalar>),
    Other(IgnoredAny),
}

fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(Scalar::deserialize(deserializer)?.into_flag())
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Scalar::deserialize(deserializer)?.into_text().unwrap_or_default())
}

fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<EffectId, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_text(deserializer).map(EffectId::new)
}

fn lenient_effects<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<EffectDocument>, D::Error> {
    Ok(match Seq::<Entry>::deserialize(deserializer)? {
        Seq::Items(entries) => entries
            .into_iter()
            .filter_map(|entry| match entry {
                Entry::Effect(effect) => Some(effect),
                Entry::Other(_) => None,
            })
            .collect(),
        Seq::Other(_) => Vec::new(),
    })
}

fn lenient_parameters<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<EffectParameters, D::Error> {
    Ok(match Table::deserialize(deserializer)? {
        Table::Entries(entries) => entries
            .into_iter()
            .filter_map(|(name, value)| value.into_text().map(|v| (name, v)))
            .collect(),
        Table::Other(_) => EffectParameters::new(),
    })
}
