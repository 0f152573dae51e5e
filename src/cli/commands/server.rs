use clap::{Arg, Command};

pub const ARG_PORT: &str = "port";
pub const ARG_READ_TIMEOUT: &str = "read-timeout-seconds";
pub const ARG_WRITE_TIMEOUT: &str = "write-timeout-seconds";
pub const ARG_SHUTDOWN_TIMEOUT: &str = "shutdown-timeout-seconds";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";

#[derive(Debug, Clone)]
pub struct Options {
    pub port: u16,
    pub read_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    pub frontend_base_url: String,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &clap::ArgMatches) -> Self {
        Self {
            port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
            read_timeout_seconds: matches
                .get_one::<u64>(ARG_READ_TIMEOUT)
                .copied()
                .unwrap_or(10),
            write_timeout_seconds: matches
                .get_one::<u64>(ARG_WRITE_TIMEOUT)
                .copied()
                .unwrap_or(10),
            shutdown_timeout_seconds: matches
                .get_one::<u64>(ARG_SHUTDOWN_TIMEOUT)
                .copied()
                .unwrap_or(10),
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("ISKONNECT_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_READ_TIMEOUT)
                .long(ARG_READ_TIMEOUT)
                .help("Maximum time to receive a request body")
                .default_value("10")
                .env("ISKONNECT_READ_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_WRITE_TIMEOUT)
                .long(ARG_WRITE_TIMEOUT)
                .help("Maximum time to produce a response")
                .default_value("10")
                .env("ISKONNECT_WRITE_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SHUTDOWN_TIMEOUT)
                .long(ARG_SHUTDOWN_TIMEOUT)
                .help("Grace period for in-flight requests on shutdown")
                .default_value("10")
                .env("ISKONNECT_SHUTDOWN_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for CORS and email links")
                .env("ISKONNECT_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
}
