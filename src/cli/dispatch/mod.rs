//! Map validated CLI arguments to the server action.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, database, email, server};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let server = server::Options::parse(matches);
    let database = database::Options::parse(matches)?;
    let auth = auth::Options::parse(matches)?;
    let email = email::Options::parse(matches);

    Ok(Action::Server(Args {
        server,
        database,
        auth,
        email,
    }))
}
