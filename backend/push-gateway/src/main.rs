/// Sends a single push notification through the gateway
///
/// Usage:
/// ```bash
/// cargo run --bin push-gateway -- --platform ios --token <TOKEN> --title Hi --body "Hello there"
/// ```
///
/// Options:
/// - `--platform <ios|android|web>`: Device platform
/// - `--token <TOKEN>`: Device token or FCM registration token
/// - `--title <TEXT>`: Notification title
/// - `--body <TEXT>`: Notification body
/// - `--badge <N>`: Badge count (optional)
///
/// Provider credentials come from `APNS_*` and `FCM_*` environment variables.
use anyhow::{Context, Result};
use push_gateway::{Delivery, GatewayConfig, Platform, PushRouter};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Debug)]
struct SendArgs {
    platform: Platform,
    device_token: String,
    title: String,
    body: String,
    badge: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,push_gateway=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;

    dotenvy::dotenv().ok();

    let config = GatewayConfig::from_env().context("Failed to load provider configuration")?;
    let router = PushRouter::from_config(&config).context("Failed to initialize providers")?;

    info!(platform = %args.platform, "Sending notification");
    let delivery = router
        .send(
            args.platform,
            &args.device_token,
            &args.title,
            &args.body,
            args.badge,
        )
        .await?;

    match delivery {
        Delivery::Sent { id } => {
            info!("Notification delivered (id: {})", id);
            Ok(())
        }
        Delivery::Rejected {
            reason,
            unregistered,
        } => {
            if unregistered {
                warn!("Device token is no longer valid and should be removed");
            }
            anyhow::bail!("Notification rejected: {}", reason)
        }
        Delivery::Unreachable(e) => {
            error!("Provider unreachable: {}", e);
            anyhow::bail!("Provider unreachable: {}", e)
        }
    }
}

fn parse_args() -> Result<SendArgs> {
    let args: Vec<String> = std::env::args().collect();

    let mut platform = None;
    let mut device_token = None;
    let mut title = None;
    let mut body = None;
    let mut badge = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--help" || flag == "-h" {
            print_help();
            std::process::exit(0);
        }
        if i + 1 >= args.len() {
            anyhow::bail!("{} requires a value", flag);
        }
        let value = args[i + 1].clone();
        match flag {
            "--platform" => platform = Some(value.parse::<Platform>()?),
            "--token" => device_token = Some(value),
            "--title" => title = Some(value),
            "--body" => body = Some(value),
            "--badge" => badge = Some(value.parse().context("Invalid badge count")?),
            _ => anyhow::bail!("Unknown argument: {}", flag),
        }
        i += 2;
    }

    Ok(SendArgs {
        platform: platform.context("--platform is required")?,
        device_token: device_token.context("--token is required")?,
        title: title.unwrap_or_default(),
        body: body.context("--body is required")?,
        badge,
    })
}

fn print_help() {
    println!("Nova Push Gateway");
    println!();
    println!("USAGE:");
    println!("    push-gateway --platform <ios|android|web> --token <TOKEN> --body <TEXT> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --title <TEXT>    Notification title");
    println!("    --badge <N>       Badge count");
    println!("    -h, --help        Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    APNS_TEAM_ID, APNS_KEY_ID, APNS_KEY_PATH, APNS_TOPIC    APNs credentials");
    println!("    FCM_SERVICE_ACCOUNT_PATH or FCM_SERVER_KEY              FCM credentials");
    println!("    RUST_LOG                                                Log level (default: info)");
}
