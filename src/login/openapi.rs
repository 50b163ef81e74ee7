use super::handlers::{health, login, ErrorResponse};
use crate::auth::LoginRequest;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(health::health, health::ping, login::login),
    components(schemas(
        health::Health,
        health::Pong,
        LoginRequest,
        login::LoginResponse,
        ErrorResponse
    )),
    tags(
        (name = "health", description = "Liveness probes"),
        (name = "login", description = "Session provisioning and refresh"),
    )
)]
struct ApiDoc;

/// OpenAPI document for every served route, titled from Cargo metadata.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc.info.description = Some(env!("CARGO_PKG_DESCRIPTION").to_string());
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_route() {
        let doc = openapi();
        for path in ["/health", "/ping", "/login"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
    }

    #[test]
    fn login_documents_error_body() -> anyhow::Result<()> {
        let json = serde_json::to_value(openapi())?;
        assert!(json["components"]["schemas"]["ErrorResponse"].is_object());
        assert!(json["components"]["schemas"]["LoginResponse"].is_object());
        Ok(())
    }
}
