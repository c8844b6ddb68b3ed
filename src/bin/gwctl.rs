//! gwctl - Gateway Control CLI
//!
//! Command-line front end for the gateway reconcilers.
//!
//! # Usage
//!
//! ```bash
//! # Set the primary address
//! sudo gwctl set-ipv4 --address 10.0.0.5 --netmask 24 --device eth0
//!
//! # Serve DHCP on the local network
//! sudo gwctl dhcp-server --pool-offset 100 --pool-size 50
//!
//! # Boot-time modem reconnect (from a systemd unit)
//! gwctl autostart
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use libgwctl::config::DEFAULT_CONFIG_PATH;
use libgwctl::{
    CommandResult, DesiredState, DhcpServerSettings, Gateway, GwctlConfig, GwctlError,
    ModemRequest,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Exit code when an operation ran but a command failed
const EXIT_FAILED: i32 = 1;
/// Exit code for rejected arguments
const EXIT_INVALID: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "gwctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Gateway Control - reconcile hostname, address, DHCP role and modem", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Runtime configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set the system hostname
    SetHostname {
        #[arg(long)]
        hostname: String,
    },
    /// Set the MTU of a device
    SetMtu {
        #[arg(long)]
        mtu: String,
        #[arg(long)]
        device: String,
    },
    /// Set the IPv4 address of a device
    SetIpv4 {
        #[arg(long)]
        address: String,
        /// Prefix length or dotted netmask
        #[arg(long)]
        netmask: String,
        #[arg(long)]
        device: String,
    },
    /// Switch to local DHCP server mode
    DhcpServer {
        #[arg(long)]
        pool_offset: String,
        #[arg(long)]
        pool_size: String,
        #[arg(long, default_value = "")]
        lease_time: String,
        #[arg(long, default_value = "")]
        domain_name: String,
    },
    /// Switch to DHCP client mode
    DhcpClient,
    /// Store a modem profile and bring the connection up
    SetModem {
        #[arg(long)]
        connection_name: String,
        #[arg(long)]
        apn: String,
        #[arg(long)]
        pin: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Wait for the modem and reconnect the stored profile
    Autostart,
    /// Apply a desired-state TOML file
    Apply {
        #[arg(long)]
        file: PathBuf,
    },
    /// Show live and persisted state
    Show {
        #[arg(long)]
        device: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    #[cfg(target_os = "linux")]
    {
        let uid = unsafe { libc::geteuid() };
        if uid != 0 {
            warn!("Not running as root - remounts and service restarts will likely fail");
        }
    }

    let code = match run(&cli).await {
        Ok(true) => 0,
        Ok(false) => EXIT_FAILED,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<GwctlError>() {
                Some(err) if err.is_invalid_argument() => EXIT_INVALID,
                _ => EXIT_FAILED,
            }
        }
    };
    process::exit(code);
}

/// Run the selected command; `Ok(false)` when an external command failed
async fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = load_config(&cli.config)?;
    let gateway = Gateway::system(config);

    let ok = match &cli.command {
        Commands::SetHostname { hostname } => {
            let result = gateway.network().set_hostname(hostname).await?;
            report_command(cli, &result)?
        }
        Commands::SetMtu { mtu, device } => {
            let result = gateway.network().set_mtu(mtu, device).await?;
            report_command(cli, &result)?
        }
        Commands::SetIpv4 { address, netmask, device } => {
            let change = gateway.network().set_ipv4(address, netmask, device).await?;
            if cli.json {
                print_json(&change)?;
            } else if !change.changed {
                println!("{} already has {}", change.device, change.target);
            } else {
                for result in &change.commands {
                    print_command(result);
                }
            }
            change.applied
        }
        Commands::DhcpServer {
            pool_offset,
            pool_size,
            lease_time,
            domain_name,
        } => {
            let settings = DhcpServerSettings {
                pool_offset: pool_offset.clone(),
                pool_size: pool_size.clone(),
                lease_time_seconds: lease_time.clone(),
                domain_name: domain_name.clone(),
            };
            let result = gateway.dhcp().enable_dhcp_server(&settings).await?;
            report_command(cli, &result)?
        }
        Commands::DhcpClient => {
            let result = gateway.dhcp().enable_dhcp_client().await?;
            report_command(cli, &result)?
        }
        Commands::SetModem {
            connection_name,
            apn,
            pin,
            user,
            password,
        } => {
            let request = ModemRequest {
                connection_name: connection_name.clone(),
                apn: apn.clone(),
                pin: pin.clone(),
                username: user.clone(),
                password: password.clone(),
            };
            let outcome = gateway.modem().set_modem(&request).await?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                outcome.unlock.iter().for_each(print_command);
                print_command(&outcome.profile);
                print_command(&outcome.activate);
            }
            outcome.success()
        }
        Commands::Autostart => {
            let outcome = gateway.autostart().await;
            if cli.json {
                print_json(&outcome)?;
            } else {
                println!("{:?}", outcome);
            }
            // A missing modem is not a failure of autostart
            true
        }
        Commands::Apply { file } => {
            let state = DesiredState::from_file(file)
                .await
                .with_context(|| format!("loading desired state {}", file.display()))?;
            let report = gateway.apply(&state).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                for step in &report.steps {
                    if step.skipped {
                        println!("{}: unchanged", step.name);
                    }
                    step.commands.iter().for_each(print_command);
                }
            }
            report.success()
        }
        Commands::Show { device } => {
            let status = gateway.status(device.as_deref()).await?;
            if cli.json {
                print_json(&status)?;
            } else {
                println!("DEVICE          {}", status.device);
                println!(
                    "LIVE ADDRESS    {}",
                    status.live_address.map(|a| a.to_string()).unwrap_or_else(|| "--".into())
                );
                println!(
                    "STORED ADDRESS  {}",
                    status
                        .link_config
                        .as_ref()
                        .map(|c| c.address.as_str())
                        .filter(|a| !a.is_empty())
                        .unwrap_or("--")
                );
                println!("DHCP MODE       {}", status.dhcp_mode);
                println!("UNMANAGED       {}", status.unmanaged);
                println!(
                    "MODEM           {}",
                    status
                        .modem_profile
                        .as_ref()
                        .map(|p| format!("{} (apn {})", p.connection_name, p.apn))
                        .unwrap_or_else(|| "--".into())
                );
                println!("MODEM DEVICE    {}", if status.modem_device_present { "present" } else { "absent" });
            }
            true
        }
    };

    Ok(ok)
}

fn load_config(path: &Path) -> anyhow::Result<GwctlConfig> {
    let config = GwctlConfig::load_or_default(path)
        .with_context(|| format!("loading configuration {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn report_command(cli: &Cli, result: &CommandResult) -> anyhow::Result<bool> {
    if cli.json {
        print_json(result)?;
    } else {
        print_command(result);
    }
    Ok(result.success())
}

fn print_command(result: &CommandResult) {
    if result.success() {
        println!("ok      {}", result.command_line());
    } else if let Some(ref err) = result.launch_error {
        println!("failed  {}: {}", result.command_line(), err);
    } else {
        let status = result
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "signal".into());
        println!("failed  {} (exit {}): {}", result.command_line(), status, result.stderr_str());
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize logging based on command-line arguments
fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose { "debug" } else { &cli.log_level };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gwctl={},libgwctl={}", log_level, log_level)));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}
