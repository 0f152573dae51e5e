use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tracing::{Instrument, debug, error, info_span};
use utoipa::ToSchema;

use crate::GIT_COMMIT_HASH;

#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseState {
    Ok,
    Error,
}

/// Build info plus the result of a database round trip.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: DatabaseState,
}

impl Health {
    fn new(database: DatabaseState) -> Self {
        Self {
            commit: GIT_COMMIT_HASH.to_string(),
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database,
        }
    }

    fn status(&self) -> StatusCode {
        match self.database {
            DatabaseState::Ok => StatusCode::OK,
            DatabaseState::Error => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// `X-App: name:version:short-commit`; the commit part is empty for
    /// builds without git metadata.
    fn x_app(&self) -> Option<HeaderValue> {
        let short = self.commit.get(..7).unwrap_or_default();
        format!("{}:{}:{short}", self.name, self.version)
            .parse()
            .map_err(|err| error!("invalid X-App header: {err}"))
            .ok()
    }
}

async fn ping_database(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut conn = pool
        .acquire()
        .instrument(info_span!("db.acquire", db.system = "postgresql", db.operation = "ACQUIRE"))
        .await?;
    conn.ping()
        .instrument(info_span!("db.ping", db.system = "postgresql", db.operation = "PING"))
        .await
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database is reachable", body = Health),
        (status = 503, description = "Database is unreachable", body = Health)
    ),
    tag = "health"
)]
pub async fn health(method: Method, Extension(pool): Extension<PgPool>) -> Response {
    let database = match ping_database(&pool).await {
        Ok(()) => DatabaseState::Ok,
        Err(err) => {
            error!("database health check failed: {err}");
            DatabaseState::Error
        }
    };
    debug!(?database, "health check");

    let health = Health::new(database);
    let mut headers = HeaderMap::new();
    if let Some(value) = health.x_app() {
        headers.insert("X-App", value);
    }

    // OPTIONS answers with the same status and headers but no body.
    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };
    (health.status(), headers, body).into_response()
}
