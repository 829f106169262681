//! evdev-keyd - keyboard diversion daemon
//!
//! Must run with access to /dev/input and /dev/uinput (normally as root).

use anyhow::{Context as _, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use evdev_keyd::{config, Config, Daemon, Transport};

#[derive(Debug, Parser)]
#[command(name = "evdev-keyd", version, about)]
struct Args {
    /// Config file (default: ~/.config/evdev-keyd/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket path, overriding the config file
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Grace period before grabbing the keyboard, in milliseconds
    #[arg(long)]
    startup_delay_ms: Option<u64>,

    /// Keyboard device to grab instead of searching for one
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Serve one client over stdin/stdout instead of the socket
    #[arg(long)]
    stdio: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::load().context("Failed to load config")?,
        };

        if let Some(socket) = &self.socket {
            config.daemon.socket_path = socket.clone();
        }
        if let Some(delay) = self.startup_delay_ms {
            config.daemon.startup_delay_ms = delay;
        }
        if let Some(device) = &self.device {
            config.daemon.device_path = Some(device.clone());
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.load_config()?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let transport = if args.stdio {
        Transport::Stdio
    } else {
        Transport::Socket
    };

    if let Ok(path) = config::config_path() {
        info!("Config: {}", args.config.as_ref().unwrap_or(&path).display());
    }

    let daemon = Daemon::new(config);

    // The hardware loop notices the flag within one poll interval and ungrabs
    let stop = daemon.stop_handle();
    ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
        .context("Failed to install signal handler")?;

    daemon.run(transport).context("evdev-keyd stopped")?;
    info!("Shut down cleanly");
    Ok(())
}
