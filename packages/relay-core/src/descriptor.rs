//! Call descriptors: the normalized parameters of one cross-service call.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::address::Stage;
use crate::context::ExecutionContext;

/// Service alias that resolves to the caller's own configured service.
pub const SELF_SERVICE: &str = "self";

// ---------------------------------------------------------------------------
// CallMode
// ---------------------------------------------------------------------------

/// Operation mode of a call. `List` maps onto an HTTP `GET` without an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallMode {
    List,
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl CallMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "LIST",
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// HTTP method used on the sync-call transport.
    #[must_use]
    pub fn http_method(self) -> &'static str {
        match self {
            Self::List => "GET",
            other => other.as_str(),
        }
    }

    /// Mode for an inbound HTTP method. A `GET` without an id or cmd is a
    /// listing.
    #[must_use]
    pub fn from_http(method: &str, id: Option<&str>, cmd: Option<&str>) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" if id.is_none() && cmd.is_none() => Some(Self::List),
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for CallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LIST" => Ok(Self::List),
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// CallDescriptor
// ---------------------------------------------------------------------------

/// Uniform description of a call to another (or the same) service.
///
/// This is the JSON body of pub/sub and queue relays, so field names are
/// part of the wire format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallDescriptor {
    /// Target service. Empty or `"self"` means the caller's own service.
    #[serde(default)]
    pub service: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        deserialize_with = "deserialize_stage"
    )]
    pub stage: Option<Stage>,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mode: Option<CallMode>,
    /// Resource id. `None` and `Some("")` are distinct on the wire.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub param: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<Map<String, Value>>,
    #[serde(default)]
    pub context: ExecutionContext,
}

impl CallDescriptor {
    /// Descriptor for `resource_type` on `service` with everything else unset.
    #[must_use]
    pub fn new(service: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: CallMode) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = Some(cmd.into());
        self
    }

    #[must_use]
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.param.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// True when the target is the caller's own service.
    #[must_use]
    pub fn targets_self(&self) -> bool {
        self.service.is_empty() || self.service == SELF_SERVICE
    }

    /// Mode after transform-time defaulting: explicit mode, else `POST` with a
    /// body and `GET` without.
    #[must_use]
    pub fn resolved_mode(&self) -> CallMode {
        self.mode.unwrap_or(if self.body.is_some() {
            CallMode::Post
        } else {
            CallMode::Get
        })
    }

    /// Applies mode defaulting and the rule that listings carry no id or cmd.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let mode = self.resolved_mode();
        if mode == CallMode::List {
            self.id = None;
            self.cmd = None;
        }
        self.mode = Some(mode);
        self
    }
}

/// Parameters for the address a callee should answer to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackDescriptor {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub param: BTreeMap<String, String>,
}

impl CallbackDescriptor {
    #[must_use]
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }
}

fn deserialize_stage<'de, D>(deserializer: D) -> Result<Option<Stage>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}
