use super::handlers::{
    auth::{login, logout, me, password, signup, types},
    health,
};
use utoipa::{
    OpenApi,
    openapi::{Contact, InfoBuilder, License},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        signup::signup,
        login::login,
        logout::logout,
        password::change_password,
        me::me,
    ),
    components(schemas(
        health::Health,
        types::SignupRequest,
        types::LoginRequest,
        types::PasswordChangeRequest,
        types::UserResponse,
        types::AuthResponse,
        types::MeResponse,
        types::LogoutResponse,
        types::PasswordChangeResponse,
        types::ErrorResponse,
    )),
    tags(
        (name = "health", description = "Service and database status"),
        (name = "auth", description = "Signup, login, logout and session management"),
    )
)]
struct ApiDoc;

/// The `OpenAPI` document served at `/openapi.json`, with info taken from Cargo metadata.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info = cargo_info();
    doc
}

fn cargo_info() -> utoipa::openapi::Info {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();
    info
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
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    let Some(start) = author.find('<') else {
        let name = author.trim();
        return (if name.is_empty() { None } else { Some(name) }, None);
    };
    let name = author[..start].trim();
    let email = author[start + 1..].trim_end_matches('>').trim();
    (
        (!name.is_empty()).then_some(name),
        (!email.is_empty()).then_some(email),
    )
}
