use utoipa::OpenApi;
use crate::common::response::ErrorBody;
use crate::modules::render::dto::{HealthResponse, RenderUpload};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::render::handler::render,
        crate::routes::health,
    ),
    components(
        schemas(ErrorBody, HealthResponse, RenderUpload)
    ),
    tags(
        (name = "Render", description = "Frame archive to MP4 rendering"),
        (name = "Health", description = "Liveness")
    )
)]
pub struct ApiDoc;
