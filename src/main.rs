use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zeroconf_core::config::{LogFormat, LoggingConfig};
use zeroconf_core::{AddressFamily, BridgeConfig, ServiceDescriptor};
use zeroconf_discovery::{ChannelSink, Delivery, MdnsPlatformFactory, SessionManager};

/// zeroconf - publish and browse DNS-SD services on the local network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "ZEROCONF_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the hostname this host advertises under
    Hostname,

    /// Watch a service type and print every event as a JSON line
    Browse {
        /// Service type, e.g. `_http._tcp.`
        service_type: String,

        /// Domain (defaults to the configured suffix)
        #[arg(long)]
        domain: Option<String>,

        /// Address family: any, ipv4 or ipv6
        #[arg(long, default_value = "any")]
        family: AddressFamily,
    },

    /// Advertise a service until interrupted
    Publish {
        /// Service type, e.g. `_http._tcp.`
        service_type: String,

        /// Instance name
        name: String,

        /// Port the service listens on
        port: u16,

        /// Domain (defaults to the configured suffix)
        #[arg(long)]
        domain: Option<String>,

        /// TXT record entry as key=value (repeatable)
        #[arg(long = "txt", value_parser = parse_txt)]
        txt: Vec<(String, String)>,

        /// Address family: any, ipv4 or ipv6
        #[arg(long, default_value = "any")]
        family: AddressFamily,
    },
}

fn parse_txt(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, _)) if key.is_empty() => Err(format!("TXT entry '{}' has an empty key", raw)),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Ok((raw.to_string(), String::new())),
    }
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("Invalid log level: {}", config.level))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = BridgeConfig::from_config_builder(args.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.format = LogFormat::Json;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Prints a delivery as one JSON line; returns true when it was terminal.
fn print_delivery(delivery: &Delivery) -> Result<bool> {
    let line = match delivery {
        Delivery::NoResult => return Ok(false),
        Delivery::Event(value) => value.to_string(),
        Delivery::Success(Some(value)) => value.to_string(),
        Delivery::Success(None) => return Ok(true),
        Delivery::Error(reply) => serde_json::to_string(reply)?,
    };
    println!("{}", line);
    Ok(delivery.is_terminal())
}

async fn browse(
    manager: &SessionManager,
    service_type: &str,
    domain: &str,
    family: AddressFamily,
) -> Result<()> {
    let (callback, events) = ChannelSink::callback();
    manager.watch(service_type, domain, family, callback);
    info!(service_type, "Browsing, press Ctrl-C to stop");

    loop {
        tokio::select! {
            delivery = events.recv() => match delivery {
                Ok(delivery) => {
                    if print_delivery(&delivery)? {
                        break;
                    }
                }
                Err(_) => break,
            },
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal, closing watches...");
                break;
            }
        }
    }

    let (callback, _) = ChannelSink::callback();
    manager.close(callback).await.context("Close task failed")?;
    Ok(())
}

async fn publish(manager: &SessionManager, descriptor: ServiceDescriptor) -> Result<()> {
    let (callback, replies) = ChannelSink::callback();
    manager
        .register(descriptor, callback)
        .await
        .context("Register task failed")?;

    match replies.recv().await.context("No reply to register")? {
        Delivery::Error(reply) => bail!("Registration failed ({}): {}", reply.code, reply.message),
        delivery => {
            print_delivery(&delivery)?;
        }
    }

    info!("Publishing, press Ctrl-C to stop");
    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal, withdrawing services...");

    let (callback, _) = ChannelSink::callback();
    manager.stop(callback).await.context("Stop task failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config.logging)?;

    let factory = Arc::new(MdnsPlatformFactory::new(config.discovery.clone()));
    let manager =
        SessionManager::new(&config, factory).context("Failed to start session manager")?;

    let outcome = match args.command {
        Command::Hostname => match manager.hostname().await {
            Ok(hostname) => {
                println!("{}", hostname);
                Ok(())
            }
            Err(e) => Err(e).context("Hostname unavailable"),
        },
        Command::Browse {
            service_type,
            domain,
            family,
        } => browse(&manager, &service_type, domain.as_deref().unwrap_or(""), family).await,
        Command::Publish {
            service_type,
            name,
            port,
            domain,
            txt,
            family,
        } => {
            let mut descriptor = ServiceDescriptor::new(
                service_type,
                domain.unwrap_or_default(),
                name,
                port,
            )
            .with_address_family(family);
            for (key, value) in txt {
                descriptor = descriptor.with_txt(key, value);
            }
            publish(&manager, descriptor).await
        }
    };

    let (callback, _) = ChannelSink::callback();
    if let Err(e) = manager.shutdown(callback).await {
        warn!(error = %e, "Shutdown task failed");
    }

    outcome
}
