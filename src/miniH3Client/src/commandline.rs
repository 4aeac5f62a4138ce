// src/miniH3Client/src/commandline.rs
use clap::{Arg, ArgAction, Command};
use lib_minih3::config::{DEFAULT_TIMEOUT, H3_29_ALPN, H3_ALPN};
use lib_minih3::{ClientConfig, TransportConfig, VerifyMode};
use log::LevelFilter;
use std::fs::File;
use std::time::Duration;

pub const DEFAULT_LOG_LEVEL: &str = "warn";
pub const DEFAULT_TIMEOUT_SECS: &str = "30";

pub struct CliConfig {
    pub url: String,
    pub debug: bool,
    pub data: Option<String>,
    pub timeout: Duration,
    pub verify_peer: bool,
    pub keylog_file: Option<String>,
}

impl CliConfig {
    pub fn client_config(&self) -> ClientConfig {
        let mut transport = TransportConfig::builder().alpn(H3_ALPN).alpn(H3_29_ALPN);
        if self.verify_peer {
            transport = transport.verify_mode(VerifyMode::Peer);
        }
        if let Some(path) = &self.keylog_file {
            transport = transport.keylog_file(path.clone());
        }
        ClientConfig::builder()
            .transport(transport.build())
            .timeout(self.timeout)
            .build()
    }
}

pub fn parse_args() -> CliConfig {
    let matches = Command::new("miniH3Client")
        .about("Fetch a URL over HTTP/3")
        .arg(Arg::new("url")
            .required(true)
            .value_parser(clap::value_parser!(String))
            .help("The https URL to fetch"))
        .arg(Arg::new("debug")
            .long("debug")
            .action(ArgAction::SetTrue)
            .help("Enable debug logging"))
        .arg(Arg::new("data")
            .long("data")
            .value_parser(clap::value_parser!(String))
            .help("Send this form-encoded body with a POST instead of a GET"))
        .arg(Arg::new("timeout")
            .long("timeout")
            .value_parser(clap::value_parser!(u64))
            .default_value(DEFAULT_TIMEOUT_SECS)
            .help("Seconds to wait for the response"))
        .arg(Arg::new("verify-peer")
            .long("verify-peer")
            .action(ArgAction::SetTrue)
            .help("Verify the server certificate"))
        .arg(Arg::new("keylog-file")
            .long("keylog-file")
            .value_parser(clap::value_parser!(String))
            .help("File to write TLS secrets to"))
        .arg(Arg::new("log-file")
            .long("log-file")
            .value_parser(clap::value_parser!(String))
            .help("File to write logs to (empty for stderr)"))
        .arg(Arg::new("log-level")
            .long("log-level")
            .value_parser(clap::value_parser!(String))
            .default_value(DEFAULT_LOG_LEVEL)
            .help("Log level: trace, debug, info, warn, error"))
        .get_matches();

    let debug = matches.get_flag("debug");
    setup_logging(&matches, debug);

    CliConfig {
        url: matches.get_one::<String>("url").cloned().unwrap_or_default(),
        debug,
        data: matches.get_one::<String>("data").cloned(),
        timeout: Duration::from_secs(
            matches
                .get_one::<u64>("timeout")
                .copied()
                .unwrap_or(DEFAULT_TIMEOUT.as_secs()),
        ),
        verify_peer: matches.get_flag("verify-peer"),
        keylog_file: matches.get_one::<String>("keylog-file").cloned(),
    }
}

fn setup_logging(matches: &clap::ArgMatches, debug: bool) {
    let log_level = matches
        .get_one::<String>("log-level")
        .map(|l| l.to_lowercase())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

    let level = match log_level.as_str() {
        _ if debug => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Warn,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);

    // If log file is specified, write to file instead of stderr
    if let Some(log_file) = matches.get_one::<String>("log-file") {
        match File::create(log_file) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            },
            Err(e) => {
                eprintln!("Failed to create log file {}: {}", log_file, e);
            }
        }
    }

    builder.init();
}
