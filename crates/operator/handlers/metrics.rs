use actix_web::{get, web::Data, HttpRequest, HttpResponse, Responder};
use mongodb_cluster::controllers::cluster_controller::State;
use prometheus::{Encoder, TextEncoder};
use tracing::error;

#[get("/metrics")]
pub async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metrics, &mut buffer) {
        error!("failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
