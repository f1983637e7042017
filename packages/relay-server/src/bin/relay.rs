//! `relay`: inspect events and addresses offline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use relay_core::{CallDescriptor, ExecutionContext, Scheme, SystemClock};
use relay_server::config::{ConfigArgs, ServiceConfig};
use relay_server::context::{ContextBuilder, PlatformContext, TokenVerifier};
use relay_server::dispatch::classify;
use relay_server::traits::NullKeyVerifier;
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Cross-service relay toolbox.
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the kind of a raw event
    Classify {
        /// Event JSON file
        file: PathBuf,
    },

    /// Build or parse addresses
    Address {
        #[command(subcommand)]
        action: AddressCommand,
    },

    /// Print the execution context built for an HTTP-proxy event
    Context {
        /// Event JSON file
        file: PathBuf,

        /// Platform request id
        #[arg(long)]
        request_id: Option<String>,

        /// Invoked function ARN
        #[arg(long)]
        function_arn: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AddressCommand {
    /// Build the address of a call
    Build {
        /// web, api, lemon, sns or sqs
        #[arg(long, default_value = "web")]
        scheme: Scheme,

        /// Target service, or `self`
        #[arg(long)]
        service: String,

        /// Resource type
        #[arg(long = "type")]
        resource_type: String,

        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        cmd: Option<String>,

        /// Query parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Account id put in front of the host
        #[arg(long)]
        account: Option<String>,
    },

    /// Split an address into its components
    Parse {
        address: String,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    let config = ServiceConfig::from(cli.config);
    debug!(service = %config.name, "relay cli");

    let output = match cli.command {
        Commands::Classify { file } => {
            let event = read_event(&file).await?;
            json!(classify(&event)?.as_str())
        }
        Commands::Address { action } => address(&config, action)?,
        Commands::Context {
            file,
            request_id,
            function_arn,
        } => {
            let event = read_event(&file).await?;
            let platform = PlatformContext {
                aws_request_id: request_id,
                invoked_function_arn: function_arn,
                ..PlatformContext::default()
            };
            let tokens = TokenVerifier::new(Arc::new(NullKeyVerifier), Arc::new(SystemClock));
            let context = ContextBuilder::new(tokens)
                .build(&event, Some(&platform))
                .await?;
            serde_json::to_value(context)?
        }
    };

    match output {
        Value::String(text) => println!("{text}"),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}

fn address(config: &ServiceConfig, action: AddressCommand) -> anyhow::Result<Value> {
    let codec = config.codec();
    match action {
        AddressCommand::Build {
            scheme,
            service,
            resource_type,
            id,
            cmd,
            params,
            account,
        } => {
            let mut call = CallDescriptor::new(service, resource_type)
                .with_context(ExecutionContext::with_ids(account, None));
            call.id = id;
            call.cmd = cmd;
            call.param = params.into_iter().collect();
            Ok(json!(codec.build(scheme, &call)?))
        }
        AddressCommand::Parse { address } => {
            let parsed = codec.parse(&address)?;
            Ok(json!({
                "scheme": parsed.scheme.as_str(),
                "accountId": parsed.account_id,
                "service": parsed.service,
                "stage": parsed.stage,
                "type": parsed.resource_type,
                "id": parsed.id,
                "cmd": parsed.cmd,
                "param": parsed.param,
                "version": parsed.version,
            }))
        }
    }
}

async fn read_event(path: &Path) -> anyhow::Result<Value> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not JSON", path.display()))
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
