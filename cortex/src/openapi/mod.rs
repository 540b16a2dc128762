//! OpenAPI documentation for the `/v1` API, served with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Optional Bearer API key. Keys are never stored, only their derived id.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("API Key")
                        .description(Some(
                            "Optional API key. Include it in the `Authorization` header:\n\n\
                            ```\nAuthorization: Bearer YOUR_API_KEY\n```\n\n\
                            Requests are recorded under the key's owner. Send `x-cortex-user` to assert \
                            which user you act as; it must match the key's owner.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/v1", description = "Cortex API")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::chat::chat,
        api::handlers::chat::chat_stream,
        api::handlers::compare::compare,
        api::handlers::compare::compare_stream,
        api::handlers::requests::get_request,
        api::handlers::requests::get_group,
        api::handlers::providers::list_providers,
    ),
    components(
        schemas(
            api::models::chat::ChatRequest,
            api::models::chat::ChatResponse,
            api::models::chat::ChatContext,
            api::models::chat::HistoryEntry,
            api::models::chat::RoutingConstraints,
            api::models::chat::RoutingSummary,
            api::models::compare::CompareRequest,
            api::models::compare::CompareResponse,
            api::models::compare::TargetRequest,
            api::models::stream::StreamEvent,
            api::models::requests::GroupAuditResponse,
            api::models::providers::ProvidersResponse,
            api::models::providers::ProviderInfo,
            api::models::providers::TierInfo,
        )
    ),
    tags(
        (name = "chat", description = "Single-prompt calls, routed or explicit"),
        (name = "compare", description = "One prompt sent to several providers at once"),
        (name = "audit", description = "Recorded requests, responses and routing decisions"),
        (name = "providers", description = "Registered providers and routing tiers"),
    ),
    info(
        title = "Cortex API",
        description = "Routes prompts across LLM providers and records an auditable trail of every call.",
    )
)]
pub struct ApiDoc;
