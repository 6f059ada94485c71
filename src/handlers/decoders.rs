//! Decoder discovery: which decoders a client may ask for with `?decoder=`
//! and which model sizes `?model=` accepts.

use crate::{error::AppError, state::AppState, transcription::ModelSize};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn list_decoders(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    let decoders: Vec<_> = state
        .decoders
        .list()
        .into_iter()
        .map(|name| {
            json!({
                "name": name,
                "default": name == config.decoder.kind
            })
        })
        .collect();

    let model_sizes: Vec<_> = ModelSize::ALL
        .iter()
        .map(|size| {
            json!({
                "name": size.as_str(),
                "description": size.description()
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "decoders": decoders,
        "model_sizes": model_sizes,
        "defaults": {
            "decoder": config.decoder.kind,
            "language": config.decoder.language,
            "model_size": config.decoder.model_size
        }
    })))
}
