use actix_web::{HttpRequest, HttpResponse, web};

use crate::dispatcher::{Dispatcher, Envelope, TOKEN_HEADER};
use crate::error::JudgeError;

/// Registers `POST /{operation}` and the not-found fallback for everything else
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/{operation}")
            .route(web::post().to(operation_handler))
            .default_service(web::to(not_found_handler)),
    )
    .default_service(web::to(not_found_handler));
}

pub async fn operation_handler(
    dispatcher: web::Data<Dispatcher>,
    path: web::Path<String>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let operation = path.into_inner();
    let token = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    // Judging blocks on child processes, so it runs on the blocking pool
    let envelope = web::block(move || dispatcher.dispatch(&operation, token.as_deref(), &body))
        .await
        .unwrap_or_else(|e| {
            log::error!("Request handler panicked: {e}");
            Envelope::from_error(&JudgeError::JudgeClient(format!("BlockingError :{e}")))
        });

    HttpResponse::Ok().json(envelope)
}

pub async fn not_found_handler() -> HttpResponse {
    HttpResponse::Ok().json(Envelope::not_found())
}
