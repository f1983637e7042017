use relay_core::wire::TransportTarget;
use relay_core::{AddressCodec, Stage};

/// Region used for topic ARNs and queue URLs when `REGION` is not set.
pub const DEFAULT_REGION: &str = "ap-northeast-2";

/// What happens to a delivery failure after it has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPolicy {
    /// Report, then return the error to the caller.
    Rethrow,
    /// Report, then resolve as if nothing was delivered.
    Swallow,
}

impl ReportPolicy {
    #[must_use]
    pub fn from_throw_flag(throw: bool) -> Self {
        if throw {
            Self::Rethrow
        } else {
            Self::Swallow
        }
    }
}

/// Service-level configuration for the relay.
///
/// Read once at startup and shared read-only (`Arc<ServiceConfig>`).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Name of this service, used for `self` addresses.
    pub name: String,
    /// Deployed version, appended to built addresses as `#version`.
    pub version: Option<String>,
    /// Deployment stage. Addresses default to `local` when unset.
    pub stage: Option<Stage>,
    /// Region of topic ARNs and queue URLs. Defaults to [`DEFAULT_REGION`].
    pub region: String,
    /// Fallback account for topic ARNs and queue URLs.
    pub account_id: Option<String>,
    pub report_policy: ReportPolicy,
    /// In-flight records per pub/sub batch.
    pub pubsub_concurrency: usize,
    /// In-flight records per queue batch.
    pub queue_concurrency: usize,
    /// In-flight records per change-feed batch.
    pub change_feed_concurrency: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: None,
            stage: None,
            region: DEFAULT_REGION.to_string(),
            account_id: None,
            report_policy: ReportPolicy::Rethrow,
            pubsub_concurrency: 5,
            queue_concurrency: 5,
            change_feed_concurrency: 1,
        }
    }
}

impl ServiceConfig {
    #[must_use]
    pub fn codec(&self) -> AddressCodec {
        AddressCodec::new(self.name.clone(), self.version.clone(), self.stage)
    }

    #[must_use]
    pub fn target(&self) -> TransportTarget {
        TransportTarget::new(self.region.clone(), self.account_id.clone())
    }
}

// ---------------------------------------------------------------------------
// ConfigArgs
// ---------------------------------------------------------------------------

/// Command-line and environment form of [`ServiceConfig`].
#[derive(Debug, Clone, clap::Args)]
pub struct ConfigArgs {
    /// Service name.
    #[arg(long = "service-name", env = "NAME", default_value = "")]
    pub name: String,
    #[arg(long = "service-version", env = "VERSION")]
    pub version: Option<String>,
    /// local, dev or prod.
    #[arg(long, env = "STAGE")]
    pub stage: Option<Stage>,
    /// Region of topic ARNs and queue URLs
    #[arg(long, env = "REGION", default_value = DEFAULT_REGION)]
    pub region: String,
    #[arg(long = "account-id", env = "ACCOUNT_ID")]
    pub account_id: Option<String>,
    /// Rethrow delivery failures after reporting them.
    #[arg(
        long = "report-error-throw",
        env = "REPORT_ERROR_THROW",
        default_value = "true",
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub report_error_throw: bool,
    #[arg(long, env = "RELAY_PUBSUB_CONCURRENCY", default_value_t = 5)]
    pub pubsub_concurrency: usize,
    #[arg(long, env = "RELAY_QUEUE_CONCURRENCY", default_value_t = 5)]
    pub queue_concurrency: usize,
    #[arg(long, env = "RELAY_CHANGE_FEED_CONCURRENCY", default_value_t = 1)]
    pub change_feed_concurrency: usize,
}

impl From<ConfigArgs> for ServiceConfig {
    fn from(args: ConfigArgs) -> Self {
        Self {
            name: args.name,
            version: args.version.filter(|v| !v.is_empty()),
            stage: args.stage,
            region: args.region,
            account_id: args.account_id.filter(|a| !a.is_empty()),
            report_policy: ReportPolicy::from_throw_flag(args.report_error_throw),
            pubsub_concurrency: args.pubsub_concurrency.max(1),
            queue_concurrency: args.queue_concurrency.max(1),
            change_feed_concurrency: args.change_feed_concurrency.max(1),
        }
    }
}
