use utoipa::OpenApi;

use crate::routes::health;
use crate::routes::v1;

#[derive(OpenApi)]
#[openapi(info(
    title = "scribe-server",
    description = "Meeting transcription API",
    version = "0.1.0",
    contact(name = "scribe-rs", url = "https://github.com/scribe-rs/scribe")
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(v1::api_docs());
    root
}
