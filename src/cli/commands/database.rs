use anyhow::{Result, anyhow};
use clap::{Arg, Command};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

pub const ARG_DB_HOST: &str = "db-host";
pub const ARG_DB_PORT: &str = "db-port";
pub const ARG_DB_USER: &str = "db-user";
pub const ARG_DB_PASSWORD: &str = "db-password";
pub const ARG_DB_NAME: &str = "db-name";
pub const ARG_DB_SSLMODE: &str = "db-sslmode";
pub const ARG_DB_MAX_CONNECTIONS: &str = "db-max-connections";

#[derive(Debug, Clone)]
pub struct Options {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub name: String,
    pub sslmode: String,
    pub max_connections: u32,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let get = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .ok_or_else(|| anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            host: get(ARG_DB_HOST)?,
            port: matches.get_one::<u16>(ARG_DB_PORT).copied().unwrap_or(5432),
            user: get(ARG_DB_USER)?,
            password: SecretString::from(get(ARG_DB_PASSWORD)?),
            name: get(ARG_DB_NAME)?,
            sslmode: get(ARG_DB_SSLMODE)?,
            max_connections: matches
                .get_one::<u32>(ARG_DB_MAX_CONNECTIONS)
                .copied()
                .unwrap_or(10),
        })
    }

    /// Assemble a Postgres DSN, escaping credentials through `Url`.
    ///
    /// # Errors
    /// Returns an error if the host is not a valid URL host.
    pub fn dsn(&self) -> Result<SecretString> {
        let mut dsn = Url::parse(&format!("postgres://{}:{}", self.host, self.port))
            .map_err(|err| anyhow!("invalid database host {}: {err}", self.host))?;

        dsn.set_username(&self.user)
            .map_err(|()| anyhow!("Error setting username"))?;
        dsn.set_password(Some(self.password.expose_secret()))
            .map_err(|()| anyhow!("Error setting password"))?;
        dsn.set_path(&self.name);
        dsn.query_pairs_mut().append_pair("sslmode", &self.sslmode);

        Ok(SecretString::from(dsn.to_string()))
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DB_HOST)
                .long(ARG_DB_HOST)
                .help("Database host")
                .env("ISKONNECT_DB_HOST")
                .default_value("localhost"),
        )
        .arg(
            Arg::new(ARG_DB_PORT)
                .long(ARG_DB_PORT)
                .help("Database port")
                .env("ISKONNECT_DB_PORT")
                .default_value("5432")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DB_USER)
                .long(ARG_DB_USER)
                .help("Database user")
                .env("ISKONNECT_DB_USER")
                .default_value("postgres"),
        )
        .arg(
            Arg::new(ARG_DB_PASSWORD)
                .long(ARG_DB_PASSWORD)
                .help("Database password")
                .env("ISKONNECT_DB_PASSWORD")
                .default_value("postgres")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_DB_NAME)
                .long(ARG_DB_NAME)
                .help("Database name")
                .env("ISKONNECT_DB_NAME")
                .default_value("iskonnect"),
        )
        .arg(
            Arg::new(ARG_DB_SSLMODE)
                .long(ARG_DB_SSLMODE)
                .help("Postgres sslmode")
                .env("ISKONNECT_DB_SSLMODE")
                .default_value("disable")
                .value_parser(["disable", "allow", "prefer", "require", "verify-ca", "verify-full"]),
        )
        .arg(
            Arg::new(ARG_DB_MAX_CONNECTIONS)
                .long(ARG_DB_MAX_CONNECTIONS)
                .help("Maximum pooled database connections")
                .env("ISKONNECT_DB_MAX_CONNECTIONS")
                .default_value("10")
                .value_parser(clap::value_parser!(u32)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn dsn_escapes_credentials() -> Result<()> {
        let options = Options {
            host: "db.internal".to_string(),
            port: 6432,
            user: "iskonnect".to_string(),
            password: SecretString::from("p@ss:word/1".to_string()),
            name: "iskonnect".to_string(),
            sslmode: "require".to_string(),
            max_connections: 5,
        };
        let dsn = options.dsn()?;
        let parsed = Url::parse(dsn.expose_secret())?;
        assert_eq!(parsed.host_str(), Some("db.internal"));
        assert_eq!(parsed.port(), Some(6432));
        assert_eq!(parsed.username(), "iskonnect");
        assert_eq!(parsed.path(), "/iskonnect");
        assert_eq!(parsed.query(), Some("sslmode=require"));
        assert!(!dsn.expose_secret().contains("p@ss:word/1"));
        Ok(())
    }
}
