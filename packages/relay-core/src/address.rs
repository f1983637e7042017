//! Protocol addresses.
//!
//! An address names a target service, a transport scheme and a resource path:
//!
//! ```text
//! <scheme>://[accountId@]<host></type[/id[/cmd]]>[?query][#version]
//! ```
//!
//! The string is logged, embedded in relayed messages and parsed by receivers
//! that may run a different deployed version, so its byte layout is fixed.
//!
//! Path asymmetry: an absent id with a non-empty command still produces an
//! empty id segment (`/type//cmd`), which parses back as an empty id. Peers
//! already depend on this layout.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::descriptor::{CallDescriptor, CallMode, CallbackDescriptor, SELF_SERVICE};
use crate::error::AddressError;

/// Characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Command encoding keeps `/` and the sub-delimiters, but still escapes `?`
/// and `#` which would otherwise split the address.
const COMMAND: &AsciiSet = &COMPONENT
    .remove(b'/')
    .remove(b';')
    .remove(b',')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$');

/// Suffix marking an API service whose transports get their own qualifier.
const API_SUFFIX: &str = "-api";
/// Host marker for non-production deployments.
const DEV_MARKER: &str = "-dev";

// ---------------------------------------------------------------------------
// Scheme
// ---------------------------------------------------------------------------

/// Transport scheme of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Synchronous function invoke, addressed by function name.
    Web,
    Api,
    /// Generic direct addressing.
    Lemon,
    /// Pub/sub topic. Build-only.
    Sns,
    /// Queue. Build-only.
    Sqs,
}

impl Scheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Api => "api",
            Self::Lemon => "lemon",
            Self::Sns => "sns",
            Self::Sqs => "sqs",
        }
    }

    /// Qualifier that replaces the `-api` suffix of a service name.
    #[must_use]
    pub fn qualifier(self) -> &'static str {
        match self {
            Self::Web | Self::Api | Self::Lemon => "api",
            Self::Sns => "sns",
            Self::Sqs => "sqs",
        }
    }

    /// Whether addresses of this scheme can be parsed back into a call.
    #[must_use]
    pub fn is_direct(self) -> bool {
        matches!(self, Self::Web | Self::Api | Self::Lemon)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Self::Web),
            "api" => Ok(Self::Api),
            "lemon" => Ok(Self::Lemon),
            "sns" => Ok(Self::Sns),
            "sqs" => Ok(Self::Sqs),
            other => Err(AddressError::UnsupportedScheme {
                scheme: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Deployment stage. `Local` and `Dev` share hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Local,
    Dev,
    Prod,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }

    #[must_use]
    pub fn is_prod(self) -> bool {
        self == Self::Prod
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ParsedAddress
// ---------------------------------------------------------------------------

/// Components recovered from a direct-addressing address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    pub scheme: Scheme,
    pub account_id: Option<String>,
    /// Host part, e.g. `self` or `hello-api-dev-lambda`.
    pub service: String,
    pub stage: Stage,
    pub resource_type: String,
    pub id: Option<String>,
    pub cmd: Option<String>,
    pub param: BTreeMap<String, String>,
    pub version: Option<String>,
}

impl ParsedAddress {
    /// Turns the address into a call descriptor with an empty context apart
    /// from the account id.
    #[must_use]
    pub fn into_descriptor(self) -> CallDescriptor {
        CallDescriptor {
            service: self.service,
            stage: Some(self.stage),
            resource_type: self.resource_type,
            id: self.id,
            cmd: self.cmd,
            param: self.param,
            context: ExecutionContext::with_ids(self.account_id, None),
            ..CallDescriptor::default()
        }
    }
}

// ---------------------------------------------------------------------------
// AddressCodec
// ---------------------------------------------------------------------------

/// Builds and parses addresses on behalf of one configured service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressCodec {
    service: String,
    version: Option<String>,
    stage: Option<Stage>,
}

impl AddressCodec {
    #[must_use]
    pub fn new(service: impl Into<String>, version: Option<String>, stage: Option<Stage>) -> Self {
        Self {
            service: service.into(),
            version: version.filter(|v| !v.is_empty()),
            stage,
        }
    }

    /// The caller's own service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// Resolves `''`/`self` to the configured service name.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::MissingArgument` when the result is empty.
    pub fn resolve_service<'a>(&'a self, target: &'a str) -> Result<&'a str, AddressError> {
        let service = if target.is_empty() || target == SELF_SERVICE {
            self.service.as_str()
        } else {
            target
        };
        if service.is_empty() {
            return Err(AddressError::MissingArgument("service"));
        }
        Ok(service)
    }

    /// Host for `service` on `scheme` at the effective stage.
    ///
    /// The explicit stage wins over the configured one; with neither, the
    /// host is derived for `local`.
    #[must_use]
    pub fn target_host(&self, scheme: Scheme, service: &str, stage: Option<Stage>) -> String {
        let stage = stage.or(self.stage).unwrap_or(Stage::Local);
        let marker = if stage.is_prod() { "" } else { DEV_MARKER };
        let host = match service.strip_suffix(API_SUFFIX) {
            Some(name) => format!("{name}-{}{marker}", scheme.qualifier()),
            None => format!("{service}{marker}"),
        };
        match scheme {
            Scheme::Web if stage.is_prod() => format!("{host}-prod-lambda"),
            Scheme::Web => format!("{host}-lambda"),
            _ => host,
        }
    }

    /// Builds the address of `call` on `scheme`.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::MissingArgument` when the service or resource
    /// type is missing.
    pub fn build(&self, scheme: Scheme, call: &CallDescriptor) -> Result<String, AddressError> {
        if call.resource_type.is_empty() {
            return Err(AddressError::MissingArgument("type"));
        }
        let service = self.resolve_service(&call.service)?;
        let host = self.target_host(scheme, service, call.stage);
        let (id, cmd) = if call.mode == Some(CallMode::List) {
            (None, None)
        } else {
            (call.id.as_deref(), call.cmd.as_deref())
        };
        let path = encode_path(&call.resource_type, id, cmd);
        Ok(self.assemble(
            scheme,
            call.context.account_id.as_deref(),
            &host,
            &path,
            None,
        ))
    }

    /// Builds the return address for a callback into the caller's own service.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::MissingArgument` when the resource type or the
    /// configured service name is missing.
    pub fn build_callback(
        &self,
        scheme: Scheme,
        callback: &CallbackDescriptor,
        context: &ExecutionContext,
    ) -> Result<String, AddressError> {
        if callback.resource_type.is_empty() {
            return Err(AddressError::MissingArgument("type"));
        }
        let service = self.resolve_service(SELF_SERVICE)?;
        let host = self.target_host(scheme, service, None);
        let path = encode_path(
            &callback.resource_type,
            callback.id.as_deref(),
            callback.cmd.as_deref(),
        );
        Ok(self.assemble(
            scheme,
            context.account_id.as_deref(),
            &host,
            &path,
            Some(&callback.param),
        ))
    }

    /// Address of the caller's own service without a resource path.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::MissingArgument` when no service is configured.
    pub fn self_address(
        &self,
        scheme: Scheme,
        context: &ExecutionContext,
    ) -> Result<String, AddressError> {
        let service = self.resolve_service(SELF_SERVICE)?;
        let host = self.target_host(scheme, service, None);
        Ok(self.assemble(scheme, context.account_id.as_deref(), &host, "", None))
    }

    fn assemble(
        &self,
        scheme: Scheme,
        account_id: Option<&str>,
        host: &str,
        path: &str,
        param: Option<&BTreeMap<String, String>>,
    ) -> String {
        let mut out = format!("{scheme}://");
        if let Some(account) = account_id.filter(|a| !a.is_empty()) {
            out.push_str(account);
            out.push('@');
        }
        out.push_str(host);
        out.push_str(path);
        if let Some(param) = param.filter(|p| !p.is_empty()) {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(param.iter())
                .finish();
            out.push('?');
            out.push_str(&query);
        }
        if let Some(version) = &self.version {
            out.push('#');
            out.push_str(version);
        }
        out
    }

    /// Parses a direct-addressing address (`web`, `api`, `lemon`).
    ///
    /// # Errors
    ///
    /// Returns `AddressError::UnsupportedScheme` for unknown or build-only
    /// schemes and `AddressError::Malformed` for structurally broken input.
    pub fn parse(&self, address: &str) -> Result<ParsedAddress, AddressError> {
        let malformed = |reason| AddressError::Malformed {
            address: address.to_string(),
            reason,
        };

        let (scheme, rest) = address
            .split_once("://")
            .ok_or_else(|| malformed("missing scheme separator"))?;
        let scheme: Scheme = scheme.parse()?;
        if !scheme.is_direct() {
            return Err(AddressError::UnsupportedScheme {
                scheme: scheme.to_string(),
            });
        }

        let (rest, version) = match rest.split_once('#') {
            Some((rest, version)) => (rest, Some(version.to_string())),
            None => (rest, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (rest, None),
        };
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let (account_id, host) = match authority.rsplit_once('@') {
            Some((account, host)) => (Some(account.to_string()), host),
            None => (None, authority),
        };
        if host.is_empty() {
            return Err(malformed("missing host"));
        }

        let segments: Vec<&str> = path.splitn(4, '/').collect();
        let resource_type = match segments.get(1) {
            Some(raw) => decode(raw).map_err(|()| malformed("invalid type encoding"))?,
            None => String::new(),
        };
        let id = segments
            .get(2)
            .map(|raw| decode(raw))
            .transpose()
            .map_err(|()| malformed("invalid id encoding"))?;
        let cmd = segments
            .get(3)
            .map(|raw| decode(raw))
            .transpose()
            .map_err(|()| malformed("invalid cmd encoding"))?;

        let param = query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        let stage = if host.contains(DEV_MARKER) {
            Stage::Dev
        } else {
            self.stage.unwrap_or(Stage::Prod)
        };

        Ok(ParsedAddress {
            scheme,
            account_id: account_id.filter(|a| !a.is_empty()),
            service: host.to_string(),
            stage,
            resource_type,
            id,
            cmd,
            param,
            version,
        })
    }
}

/// Resource path for `type`, `id` and `cmd`.
///
/// A present id is always emitted, even when empty; a command only when it
/// is non-empty.
#[must_use]
pub fn encode_path(resource_type: &str, id: Option<&str>, cmd: Option<&str>) -> String {
    let mut path = String::from("/");
    path.push_str(&Cow::from(utf8_percent_encode(resource_type, COMPONENT)));
    let cmd = cmd.filter(|c| !c.is_empty());
    match id {
        Some(id) => {
            path.push('/');
            path.push_str(&Cow::from(utf8_percent_encode(id, COMPONENT)));
            if let Some(cmd) = cmd {
                path.push('/');
                path.push_str(&Cow::from(utf8_percent_encode(cmd, COMMAND)));
            }
        }
        None => {
            if let Some(cmd) = cmd {
                path.push_str("//");
                path.push_str(&Cow::from(utf8_percent_encode(cmd, COMMAND)));
            }
        }
    }
    path
}

/// The address without its `#version` fragment, usable as a routing key.
#[must_use]
pub fn strip_version(address: &str) -> &str {
    address.split_once('#').map_or(address, |(base, _)| base)
}

/// Host part of an address, without userinfo, path, query or fragment.
#[must_use]
pub fn host_of(address: &str) -> Option<&str> {
    let (_, rest) = address.split_once("://")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    (!host.is_empty()).then_some(host)
}

/// Userinfo (account id) of an address, if any.
#[must_use]
pub fn account_of(address: &str) -> Option<&str> {
    let (_, rest) = address.split_once("://")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    rest[..end]
        .rsplit_once('@')
        .map(|(account, _)| account)
        .filter(|a| !a.is_empty())
}

fn decode(raw: &str) -> Result<String, ()> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(Cow::into_owned)
        .map_err(|_| ())
}
