use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{ArgusError, Result};

/// Network traffic capture and analysis tool.
#[derive(Parser, Debug, Clone)]
#[command(name = "argus_ids", version, about = "Capture Argus flows and classify them with a trained model")]
pub struct Args {
    /// Network interface to capture traffic on (e.g. eth0, lo)
    #[arg(short = 'i', long = "interface", value_name = "IFACE")]
    pub interface: String,

    /// Duration of the capture in seconds
    #[arg(short = 't', long = "time", value_name = "SECS")]
    pub time: u64,

    #[arg(long = "argus", value_name = "PATH", default_value = "/usr/local/sbin/argus")]
    pub argus_path: PathBuf,

    #[arg(long = "ra", value_name = "PATH", default_value = "/usr/local/bin/ra")]
    pub ra_path: PathBuf,

    #[arg(long = "host", default_value = "localhost")]
    pub host: String,

    #[arg(long = "port", default_value_t = 561)]
    pub port: u16,

    #[arg(long = "model", value_name = "PATH", default_value = "my_rf_model.joblib")]
    pub model_path: PathBuf,

    #[arg(long = "results", value_name = "PATH", default_value = "prediction_results.txt")]
    pub results_path: PathBuf,

    /// Directory the raw capture CSV is written to
    #[arg(long = "capture-dir", value_name = "DIR", default_value = ".")]
    pub capture_dir: PathBuf,

    #[arg(long = "poll-interval", value_name = "SECS", default_value_t = 3)]
    pub poll_interval: u64,

    /// Give up waiting for the daemon to come up after this many seconds (0 waits forever)
    #[arg(long = "start-timeout", value_name = "SECS", default_value_t = 60)]
    pub start_timeout: u64,

    /// Give up waiting for the daemon to go down after this many seconds (0 waits forever)
    #[arg(long = "stop-timeout", value_name = "SECS", default_value_t = 60)]
    pub stop_timeout: u64,

    /// UTC offset, in hours, used for result timestamps
    #[arg(long = "utc-offset", value_name = "HOURS", default_value_t = 7, allow_hyphen_values = true)]
    pub utc_offset_hours: i32,

    /// Command used to stop a daemon this run did not start
    #[arg(long = "shutdown-command", value_name = "CMD", num_args = 1.., default_values_t = vec!["pkill".to_string(), "-x".to_string(), "argus".to_string()])]
    pub shutdown_command: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub argus_path: PathBuf,
    pub ra_path: PathBuf,
    pub interface: String,
    pub duration_secs: u64,
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub results_path: PathBuf,
    pub capture_dir: PathBuf,
    pub poll_interval: Duration,
    pub start_timeout: Option<Duration>,
    pub stop_timeout: Option<Duration>,
    pub utc_offset_hours: i32,
    pub shutdown_command: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            argus_path: PathBuf::from("/usr/local/sbin/argus"),
            ra_path: PathBuf::from("/usr/local/bin/ra"),
            interface: String::new(),
            duration_secs: 15,
            host: "localhost".to_string(),
            port: 561,
            model_path: PathBuf::from("my_rf_model.joblib"),
            results_path: PathBuf::from("prediction_results.txt"),
            capture_dir: PathBuf::from("."),
            poll_interval: Duration::from_secs(3),
            start_timeout: Some(Duration::from_secs(60)),
            stop_timeout: Some(Duration::from_secs(60)),
            utc_offset_hours: 7,
            shutdown_command: vec!["pkill".to_string(), "-x".to_string(), "argus".to_string()],
        }
    }
}

fn optional_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

impl From<&Args> for PipelineConfig {
    fn from(args: &Args) -> Self {
        Self {
            argus_path: args.argus_path.clone(),
            ra_path: args.ra_path.clone(),
            interface: args.interface.clone(),
            duration_secs: args.time,
            host: args.host.clone(),
            port: args.port,
            model_path: args.model_path.clone(),
            results_path: args.results_path.clone(),
            capture_dir: args.capture_dir.clone(),
            poll_interval: Duration::from_secs(args.poll_interval),
            start_timeout: optional_secs(args.start_timeout),
            stop_timeout: optional_secs(args.stop_timeout),
            utc_offset_hours: args.utc_offset_hours,
            shutdown_command: args.shutdown_command.clone(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            return Err(ArgusError::Config("interface must not be empty".to_string()));
        }
        if self.duration_secs == 0 {
            return Err(ArgusError::Config("capture duration must be at least one second".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(ArgusError::Config("poll interval must be non-zero".to_string()));
        }
        if self.utc_offset_hours.abs() >= 24 {
            return Err(ArgusError::Config(format!(
                "UTC offset {} is out of range",
                self.utc_offset_hours
            )));
        }
        if self.shutdown_command.is_empty() {
            return Err(ArgusError::Config("shutdown command must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn test_args_defaults_match_reference_setup() {
        let args = parse(&["argus_ids", "-i", "eth0", "-t", "30"]);
        let config = PipelineConfig::from(&args);

        assert_eq!(config.interface, "eth0");
        assert_eq!(config.duration_secs, 30);
        assert_eq!(config.port, 561);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.utc_offset_hours, 7);
        assert_eq!(config.shutdown_command, vec!["pkill", "-x", "argus"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_means_unbounded() {
        let args = parse(&["argus_ids", "-i", "lo", "-t", "5", "--start-timeout", "0"]);
        let config = PipelineConfig::from(&args);
        assert!(config.start_timeout.is_none());
        assert_eq!(config.stop_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_interface_and_time_are_required() {
        assert!(Args::try_parse_from(["argus_ids", "-t", "5"]).is_err());
        assert!(Args::try_parse_from(["argus_ids", "-i", "lo"]).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig {
            interface: "lo".to_string(),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());

        config.duration_secs = 0;
        assert!(matches!(config.validate(), Err(ArgusError::Config(_))));

        config.duration_secs = 10;
        config.utc_offset_hours = 24;
        assert!(matches!(config.validate(), Err(ArgusError::Config(_))));

        config.utc_offset_hours = -7;
        config.interface = "  ".to_string();
        assert!(matches!(config.validate(), Err(ArgusError::Config(_))));
    }
}
