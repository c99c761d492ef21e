//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{armory, health};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Clan Armory API",
        version = "0.3.0",
        description = "Shared item lending between clan members",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Armory
        armory::list_armory,
        armory::offer_item,
        armory::withdraw_offer,
        armory::borrow_item,
        armory::return_item,
        armory::touch_loan,
        armory::disable_item_type,
        armory::purge_member,
        armory::run_sweep,
    ),
    components(
        schemas(
            // Armory
            armory::OfferItemRequest,
            armory::OfferResponse,
            armory::LoanResponse,
            armory::MemberPurgeResponse,
            crate::models::armory::ArmoryEntryDetails,
            crate::services::reconciler::PurgeReport,
            crate::services::sweeper::SweepReport,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "armory", description = "Clan armory lending")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
