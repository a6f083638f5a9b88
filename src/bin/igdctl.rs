use anyhow::Result;
use clap::{Parser, Subcommand};
use igdctl::{
    init_logging, netinfo, IgdClient, IgdConfig, PortMapper, PortMapping, Protocol, RenewalEvent,
};
use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "UPnP IGD port mapping control", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// SSDP discovery window in seconds
    #[arg(long, default_value_t = 2)]
    discovery_window: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send an SSDP probe and print the response headers
    Discover,

    /// Enumerate the gateway's port mapping table
    List {
        /// Print mappings as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a port mapping
    Add {
        /// External port on the gateway
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        external_port: u16,

        /// Internal port on this host
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        internal_port: u16,

        /// Internal client address (defaults to this host's LAN IPv4)
        #[arg(long)]
        ip: Option<Ipv4Addr>,

        /// TCP or UDP
        #[arg(short, long, default_value = "tcp")]
        protocol: Protocol,

        /// Mapping description shown in the router UI
        #[arg(short, long, default_value = "igdctl")]
        description: String,

        /// Lease duration in seconds (0 = infinite)
        #[arg(short, long, default_value_t = 0)]
        lease: u32,

        /// Keep running and re-issue the mapping at half the lease
        #[arg(long)]
        renew: bool,
    },

    /// Delete a port mapping
    Remove {
        /// External port of the mapping
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        external_port: u16,

        /// TCP or UDP
        #[arg(short, long, default_value = "tcp")]
        protocol: Protocol,
    },

    /// Print the gateway's WAN-side address
    ExternalIp,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let client = IgdClient::new(IgdConfig {
        discovery_window: Duration::from_secs(args.discovery_window),
        ..IgdConfig::default()
    });
    let mut mapper = PortMapper::new(client);

    match args.command {
        Command::Discover => {
            let headers = mapper.discover().await?;
            if headers.is_empty() {
                println!("no UPnP devices responded");
            } else {
                for (key, value) in &headers {
                    println!("{key}: {value}");
                }
            }
        }

        Command::List { json } => {
            let mappings = mapper.discover_and_list_mappings().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&mappings)?);
            } else if mappings.is_empty() {
                println!("no port mappings on the gateway");
            } else {
                for mapping in &mappings {
                    println!("{mapping}");
                }
            }
        }

        Command::Add {
            external_port,
            internal_port,
            ip,
            protocol,
            description,
            lease,
            renew,
        } => {
            let mapping = PortMapping {
                protocol,
                external_port,
                internal_client: ip.unwrap_or_else(netinfo::local_ipv4),
                internal_port,
                description,
                lease_duration: lease,
                enabled: true,
            };
            let outcome = mapper.add_mapping(mapping, renew).await;
            println!("{}", outcome.detail);
            if !outcome.is_success() {
                return Ok(ExitCode::from(outcome.code as u8));
            }
            if renew {
                watch_renewals(&mut mapper).await;
            }
        }

        Command::Remove {
            external_port,
            protocol,
        } => {
            let outcome = mapper.remove_mapping(external_port, protocol).await;
            println!("{}", outcome.detail);
            if !outcome.is_success() {
                return Ok(ExitCode::from(outcome.code as u8));
            }
        }

        Command::ExternalIp => {
            println!("{}", mapper.external_ip().await?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Block printing renewal outcomes until the last entry is gone or the
/// user interrupts.
async fn watch_renewals(mapper: &mut PortMapper) {
    let Some(mut events) = mapper.take_events() else {
        return;
    };
    println!("renewing; press Ctrl-C to stop");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(RenewalEvent::Renewed { identity, next_in }) => {
                    println!("renewed {identity}, next in {}s", next_in.as_secs());
                }
                Some(RenewalEvent::Cancelled { identity }) => {
                    println!("renewal cancelled for {identity}");
                    break;
                }
                Some(RenewalEvent::Failed { identity, detail }) => {
                    eprintln!("renewal failed for {identity}: {detail}");
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("stopping");
                break;
            }
        }
    }
}
