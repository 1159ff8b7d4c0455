use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Read-only view of the running configuration. Subscription keys are
/// reported as present/absent, never echoed.
pub async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "speech": {
                "key_configured": !config.speech.key.is_empty(),
                "region": config.speech.region,
                "language": config.speech.language
            },
            "translation": {
                "key_configured": config.translator_configured(),
                "endpoint": config.translation.endpoint,
                "region": config.translation.region,
                "source": config.translation.source,
                "target": config.translation.target
            },
            "notes": {
                "url": config.notes.url,
                "timeout_seconds": config.notes.timeout
            }
        }
    }))
}
