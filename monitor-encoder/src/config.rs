//! Command-line and environment configuration.
//!
//! Every flag can also be set through a `MONITOR_ENCODER_*` environment
//! variable; a `.env` file in the working directory is loaded first.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::active_time::ActiveTimeWindow;
use crate::stages::{Directories, PipelineSettings};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Watch a directory for encoding jobs and run them", long_about = None)]
pub struct Cli {
    /// Number of concurrent video encoders
    #[arg(short = 'n', long, env = "MONITOR_ENCODER_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Directory polled for job descriptors
    #[arg(
        long,
        alias = "md",
        env = "MONITOR_ENCODER_MONITOR_DIR",
        default_value = "monitor_dir"
    )]
    pub monitor_dir: PathBuf,

    /// Directory holding in-progress jobs and intermediate files
    #[arg(
        long,
        alias = "wd",
        env = "MONITOR_ENCODER_WORK_DIR",
        default_value = "work_dir"
    )]
    pub work_dir: PathBuf,

    /// Directory receiving finished artifacts
    #[arg(
        long,
        alias = "od",
        env = "MONITOR_ENCODER_OUTPUT_DIR",
        default_value = "output_dir"
    )]
    pub output_dir: PathBuf,

    /// Address the HTTP server binds to
    #[arg(long, env = "MONITOR_ENCODER_IP", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub ip: IpAddr,

    #[arg(long, env = "MONITOR_ENCODER_PORT", default_value_t = 8899)]
    pub port: u16,

    /// Daily encoding window, HH:MM:SS-HH:MM:SS. Equal ends disable the window.
    #[arg(
        long,
        env = "MONITOR_ENCODER_ACTIVE_TIME",
        default_value = "00:00:00-00:00:00"
    )]
    pub active_time: ActiveTimeWindow,

    #[arg(long, env = "MONITOR_ENCODER_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// How often the monitor directory is scanned, in milliseconds
    #[arg(long, env = "MONITOR_ENCODER_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Capacity of the channels between stages; 0 hands tasks over directly
    #[arg(long, env = "MONITOR_ENCODER_CHANNEL_CAPACITY", default_value_t = 0)]
    pub channel_capacity: usize,

    /// Start even if some external tools cannot be found
    #[arg(long, env = "MONITOR_ENCODER_SKIP_TOOL_CHECK")]
    pub skip_tool_check: bool,
}

impl Cli {
    /// Load `.env`, then parse arguments and environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }

    pub fn directories(&self) -> Directories {
        Directories {
            monitor: self.monitor_dir.clone(),
            work: self.work_dir.clone(),
            output: self.output_dir.clone(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            workers: self.workers,
            channel_capacity: self.channel_capacity,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}
