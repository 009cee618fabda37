//! Host Bridge CLI Application
//!
//! Test tool for the host boundary. It stands in for the managed host, either
//! a recording stub described by a TOML profile or a real host loaded from a
//! shared library, then calls one capability the way the tunnel engine would
//! and prints what happened:
//! - Capability status
//! - Process resolution for a flow
//! - Socket protection, directly or through a TUN session
//! - Result delivery and handle release

use anyhow::Result;
use clap::{Parser, Subcommand};
use host_bridge::{
    ActionResult, CallbackHandle, Capability, HostCallbacks, Method, ObjectHandle, Protocol,
    SocketProtector, TunnelContext,
};
use std::path::PathBuf;

mod config;
mod library;
mod stub_host;

use config::HostProfile;
use library::HostLibrary;
use stub_host::StubHost;

/// Host Bridge - exercise host callbacks from the native side
#[derive(Parser, Debug)]
#[command(name = "host-bridge-cli")]
#[command(about = "Exercise host callbacks the way the tunnel engine calls them", long_about = None)]
#[command(version)]
struct Args {
    /// Path to a stub host profile (host.toml)
    #[arg(short, long, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Load the host from a shared library instead of the stub
    #[arg(short, long, value_name = "FILE")]
    library: Option<PathBuf>,

    /// Symbol exporting the callback table
    #[arg(long, value_name = "NAME")]
    symbol: Option<String>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which capabilities the host installs
    Status,

    /// Ask the host which package owns a flow
    Resolve {
        /// Protocol name (tcp, udp, icmp) or number
        #[arg(long, default_value = "tcp")]
        protocol: Protocol,
        /// Source endpoint, e.g. 10.0.0.1:443
        #[arg(long)]
        source: String,
        /// Target endpoint, e.g. 93.1.1.1:443
        #[arg(long)]
        target: String,
        #[arg(long, default_value_t = 0)]
        uid: i32,
        /// Tunnel context handle
        #[arg(long, default_value = "0x1", value_parser = parse_handle)]
        ctx: usize,
    },

    /// Ask the host to protect a socket
    Protect {
        #[arg(long)]
        fd: i32,
        #[arg(long, default_value = "0x1", value_parser = parse_handle)]
        ctx: usize,
    },

    /// Deliver a payload to a host callback
    Invoke {
        #[arg(long)]
        payload: String,
        #[arg(long, default_value = "0x1", value_parser = parse_handle)]
        callback: usize,
        /// Wrap the payload in a JSON action result for this method
        #[arg(long)]
        method: Option<String>,
        #[arg(long, default_value = "")]
        id: String,
    },

    /// Release a host object
    Release {
        #[arg(long, value_parser = parse_handle)]
        handle: usize,
    },

    /// Start a TUN session and protect sockets through it
    Tun {
        #[arg(long)]
        fd: i32,
        #[arg(long, default_value = "system")]
        stack: String,
        /// Comma-separated CIDR prefixes
        #[arg(long, default_value = "")]
        address: String,
        /// Comma-separated DNS servers
        #[arg(long, default_value = "")]
        dns: String,
        /// Socket descriptors to protect while the session runs
        #[arg(long = "protect-fd", value_name = "FD")]
        protect: Vec<i32>,
        #[arg(long, default_value = "0x1", value_parser = parse_handle)]
        ctx: usize,
    },
}

/// The host the CLI talks to
enum Host {
    Stub(StubHost),
    Library(HostLibrary),
}

impl Host {
    fn open(args: &Args, profile: HostProfile) -> Result<Self> {
        let library = match (&args.library, &profile.library) {
            (Some(path), _) => Some((path.clone(), args.symbol.clone())),
            (None, Some(lib)) => Some((lib.path.clone(), Some(lib.symbol.clone()))),
            (None, None) => None,
        };

        match library {
            Some((path, symbol)) => {
                let symbol = symbol.unwrap_or_else(|| library::DEFAULT_SYMBOL.to_string());
                Ok(Host::Library(HostLibrary::load(&path, &symbol)?))
            }
            None => Ok(Host::Stub(StubHost::new(profile))),
        }
    }

    fn callbacks(&self) -> HostCallbacks {
        match self {
            Host::Stub(stub) => stub.callbacks(),
            Host::Library(lib) => lib.callbacks().clone(),
        }
    }

    fn print_calls(&self) {
        if let Host::Stub(stub) = self {
            println!("\nHost received:");
            let calls = stub.calls();
            if calls.is_empty() {
                println!("  (nothing)");
            }
            for call in calls {
                println!("  {}", call);
            }
        }
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Host Bridge CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using host-bridge library v{}", host_bridge::VERSION);

    let profile = match &args.profile {
        Some(path) => {
            log::info!("Loading host profile from: {:?}", path);
            config::load_profile(path)?
        }
        None => HostProfile::default(),
    };

    let host = Host::open(&args, profile)?;
    let callbacks = host.callbacks();

    run_command(&args.command, &callbacks)?;
    host.print_calls();

    Ok(())
}

fn run_command(command: &Command, callbacks: &HostCallbacks) -> Result<()> {
    match command {
        Command::Status => {
            println!("Host capabilities:");
            for capability in Capability::ALL {
                let mark = if callbacks.is_available(capability) { "✓" } else { "✗" };
                println!("  {} {}", mark, capability);
            }
        }

        Command::Resolve {
            protocol,
            source,
            target,
            uid,
            ctx,
        } => {
            let ctx = TunnelContext::from_addr(*ctx);
            match callbacks.resolve_process(ctx, protocol.as_raw(), source, target, *uid) {
                Some(name) => println!("{}", callbacks.take_string(name)),
                None => println!("<absent>"),
            }
        }

        Command::Protect { fd, ctx } => {
            callbacks.protect_socket(TunnelContext::from_addr(*ctx), *fd);
            println!("protect_socket dispatched for fd {}", fd);
        }

        Command::Invoke {
            payload,
            callback,
            method,
            id,
        } => {
            let callback = CallbackHandle::from_addr(*callback);
            match method {
                Some(method) => {
                    let data = serde_json::from_str::<serde_json::Value>(payload)
                        .unwrap_or_else(|_| serde_json::Value::String(payload.clone()));
                    ActionResult::success(id.as_str(), Method::new(method.as_str()), data)
                        .send(callbacks, callback);
                }
                None => callbacks.invoke_result(callback, payload),
            }
            println!("invoke_result dispatched to {:?}", callback);
        }

        Command::Release { handle } => {
            callbacks.release_object(ObjectHandle::from_addr(*handle));
            println!("release_object dispatched for {:#x}", handle);
        }

        Command::Tun {
            fd,
            stack,
            address,
            dns,
            protect,
            ctx,
        } => {
            let protector = SocketProtector::new(callbacks.clone());
            let config = protector.start(TunnelContext::from_addr(*ctx), *fd, stack, address, dns)?;
            println!("{}", serde_json::to_string_pretty(&config)?);

            for socket in protect {
                protector.protect_fd(*socket);
            }
            protector.stop();
        }
    }

    Ok(())
}

/// Parse a handle given as hex (`0x10`) or decimal
fn parse_handle(s: &str) -> std::result::Result<usize, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid handle {:?}: {}", s, e))
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
