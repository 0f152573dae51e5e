use clap::{Arg, Command};
use secrecy::SecretString;

pub const ARG_SMTP_HOST: &str = "smtp-host";
pub const ARG_SMTP_PORT: &str = "smtp-port";
pub const ARG_SMTP_USERNAME: &str = "smtp-username";
pub const ARG_SMTP_PASSWORD: &str = "smtp-password";
pub const ARG_FROM_EMAIL: &str = "from-email";
pub const ARG_FROM_NAME: &str = "from-name";

#[derive(Debug, Clone)]
pub struct OutboxOptions {
    pub poll_seconds: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<SecretString>,
    pub from_email: String,
    pub from_name: String,
    pub outbox: OutboxOptions,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &clap::ArgMatches) -> Self {
        Self {
            smtp_host: matches
                .get_one::<String>(ARG_SMTP_HOST)
                .cloned()
                .unwrap_or_else(|| "smtp.gmail.com".to_string()),
            smtp_port: matches.get_one::<u16>(ARG_SMTP_PORT).copied().unwrap_or(587),
            smtp_username: matches.get_one::<String>(ARG_SMTP_USERNAME).cloned(),
            smtp_password: matches
                .get_one::<String>(ARG_SMTP_PASSWORD)
                .cloned()
                .map(SecretString::from),
            from_email: matches
                .get_one::<String>(ARG_FROM_EMAIL)
                .cloned()
                .unwrap_or_else(|| "no-reply@iskonnect.com".to_string()),
            from_name: matches
                .get_one::<String>(ARG_FROM_NAME)
                .cloned()
                .unwrap_or_else(|| "ISKOnnect".to_string()),
            outbox: OutboxOptions {
                poll_seconds: matches
                    .get_one::<u64>("email-outbox-poll-seconds")
                    .copied()
                    .unwrap_or(5),
                batch_size: matches
                    .get_one::<usize>("email-outbox-batch-size")
                    .copied()
                    .unwrap_or(10),
                max_attempts: matches
                    .get_one::<u32>("email-outbox-max-attempts")
                    .copied()
                    .unwrap_or(5),
                backoff_base_seconds: matches
                    .get_one::<u64>("email-outbox-backoff-base-seconds")
                    .copied()
                    .unwrap_or(5),
                backoff_max_seconds: matches
                    .get_one::<u64>("email-outbox-backoff-max-seconds")
                    .copied()
                    .unwrap_or(300),
            },
        }
    }
}

pub fn with_args(command: Command) -> Command {
    let command = with_smtp_args(command);
    with_outbox_args(command)
}

fn with_smtp_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMTP_HOST)
                .long(ARG_SMTP_HOST)
                .help("SMTP relay host")
                .env("ISKONNECT_SMTP_HOST")
                .default_value("smtp.gmail.com"),
        )
        .arg(
            Arg::new(ARG_SMTP_PORT)
                .long(ARG_SMTP_PORT)
                .help("SMTP relay port (STARTTLS)")
                .env("ISKONNECT_SMTP_PORT")
                .default_value("587")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SMTP_USERNAME)
                .long(ARG_SMTP_USERNAME)
                .help("SMTP username; emails are only logged when unset")
                .env("ISKONNECT_SMTP_USERNAME")
                .requires(ARG_SMTP_PASSWORD),
        )
        .arg(
            Arg::new(ARG_SMTP_PASSWORD)
                .long(ARG_SMTP_PASSWORD)
                .help("SMTP password")
                .env("ISKONNECT_SMTP_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_FROM_EMAIL)
                .long(ARG_FROM_EMAIL)
                .help("Sender address for outgoing email")
                .env("ISKONNECT_FROM_EMAIL")
                .default_value("no-reply@iskonnect.com"),
        )
        .arg(
            Arg::new(ARG_FROM_NAME)
                .long(ARG_FROM_NAME)
                .help("Sender display name for outgoing email")
                .env("ISKONNECT_FROM_NAME")
                .default_value("ISKOnnect"),
        )
}

fn with_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-outbox-poll-seconds")
                .long("email-outbox-poll-seconds")
                .help("Email outbox poll interval in seconds")
                .env("ISKONNECT_EMAIL_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-batch-size")
                .long("email-outbox-batch-size")
                .help("Email outbox batch size per poll")
                .env("ISKONNECT_EMAIL_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("email-outbox-max-attempts")
                .long("email-outbox-max-attempts")
                .help("Max attempts before marking an email as failed")
                .env("ISKONNECT_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("email-outbox-backoff-base-seconds")
                .long("email-outbox-backoff-base-seconds")
                .help("Base delay for email outbox retry backoff")
                .env("ISKONNECT_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-backoff-max-seconds")
                .long("email-outbox-backoff-max-seconds")
                .help("Max delay for email outbox retry backoff")
                .env("ISKONNECT_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}
