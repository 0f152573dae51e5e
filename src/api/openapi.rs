use super::handlers::{admin, auth, health, materials, users};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Every documented endpoint is registered here via `.routes(routes!(...))`.
/// Routes added in `api::app` (`/` and `OPTIONS /health`) stay undocumented.
pub(crate) fn api_router() -> OpenApiRouter {
    // Handlers sharing a path must share one `routes!` call.
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::register::register))
        .routes(routes!(auth::verification::verify_email))
        .routes(routes!(auth::verification::resend_verification))
        .routes(routes!(auth::session::login))
        .routes(routes!(auth::session::logout))
        .routes(routes!(auth::session::refresh))
        .routes(routes!(auth::password_reset::forgot_password))
        .routes(routes!(auth::password_reset::verify_otp))
        .routes(routes!(auth::password_reset::reset_password))
        .routes(routes!(users::get_me, users::update_me))
        .routes(routes!(users::my_bookmarks))
        .routes(routes!(users::leaderboard))
        .routes(routes!(users::get_user))
        .routes(routes!(materials::list_materials, materials::create_material))
        .routes(routes!(
            materials::get_material,
            materials::update_material,
            materials::delete_material
        ))
        .routes(routes!(materials::vote_material))
        .routes(routes!(
            materials::bookmark_material,
            materials::remove_bookmark
        ))
        .routes(routes!(materials::report_material))
        .routes(routes!(admin::dashboard))
        .routes(routes!(admin::list_users))
        .routes(routes!(admin::delete_user))
        .routes(routes!(admin::list_reports))
        .routes(routes!(admin::update_report))
        .routes(routes!(admin::delete_material));

    router.get_openapi_mut().tags = Some(vec![
        tag("auth", "Registration, sessions and password reset"),
        tag("users", "Profiles, bookmarks and the leaderboard"),
        tag("materials", "Shared study materials, votes and reports"),
        tag("admin", "Moderation and platform statistics"),
        tag("health", "Service and database health"),
    ]);

    router
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_author<'a>(author: &'a str) -> (Option<&'a str>, Option<&'a str>) {
    let non_empty = |value: &'a str| -> Option<&'a str> {
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    };
    match author.find('<') {
        Some(start) => (
            non_empty(&author[..start]),
            non_empty(author[start + 1..].trim_end_matches('>')),
        ),
        None => (non_empty(author), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));

        let contact = spec.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team ISKOnnect"));
            assert_eq!(contact.email.as_deref(), Some("team@iskonnect.com"));
        }

        let license = spec.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
        }
    }

    #[test]
    fn openapi_tags_and_paths() {
        let spec = openapi();
        let tags = spec.tags.clone().unwrap_or_default();
        for name in ["auth", "users", "materials", "admin", "health"] {
            assert!(tags.iter().any(|tag| tag.name == name), "missing tag {name}");
        }
        for path in [
            "/health",
            "/api/auth/register",
            "/api/auth/verify-otp",
            "/api/users/me/bookmarks",
            "/api/materials/{id}/vote",
            "/api/admin/reports/{id}",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing path {path}");
        }
    }

    #[test]
    fn shared_paths_keep_every_method() {
        let spec = openapi();
        let item = spec.paths.paths.get("/api/materials/{id}");
        assert!(item.is_some());
        if let Some(item) = item {
            assert!(item.get.is_some());
            assert!(item.put.is_some());
            assert!(item.delete.is_some());
        }
    }

    #[test]
    fn parse_author_variants() {
        assert_eq!(
            parse_author("Team ISKOnnect <team@iskonnect.com>"),
            (Some("Team ISKOnnect"), Some("team@iskonnect.com"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("<only@mail>"), (None, Some("only@mail")));
    }
}
