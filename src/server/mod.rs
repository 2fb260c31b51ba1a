//! Read-only HTTP view of the known-product catalog.
//!
//! - `GET /api/products`: every known product as a JSON array
//! - `GET /api/products/updates`: server-sent events, starting with one
//!   `update` frame holding the full catalog, then `heartbeat` frames until
//!   the client goes away (or nothing more when heartbeats are off)
//!
//! Every response carries permissive CORS headers and `OPTIONS` is answered
//! on any path for preflight requests.

use std::time::Duration;

use actix_web::dev::Server;
use actix_web::http::Method;
use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use actix_web::middleware::DefaultHeaders;
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, Responder, web};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::catalog::SharedCatalog;
use crate::models::Product;

#[derive(Clone)]
pub struct ServerState {
    catalog: SharedCatalog,
    heartbeat: Option<Duration>,
}

impl ServerState {
    pub fn new(catalog: SharedCatalog, heartbeat: Option<Duration>) -> Self {
        Self { catalog, heartbeat }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamEvent {
    Update { products: Vec<Product> },
    Heartbeat,
}

/// Binds `0.0.0.0:<port>`. Signal handling is left to the caller, which
/// stops the server through its handle.
pub fn start(state: ServerState, port: u16) -> std::io::Result<Server> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors_headers())
            .configure(routes)
            .default_service(web::to(not_found))
    })
    .bind(("0.0.0.0", port))?
    .disable_signals()
    .shutdown_timeout(5)
    .run();

    info!(port, "Query server listening");
    Ok(server)
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/products")
            .route(web::get().to(list_products))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/products/updates")
            .route(web::get().to(product_updates))
            .default_service(web::to(method_not_allowed)),
    );
}

pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET, OPTIONS"))
        .add(("Access-Control-Allow-Headers", "Content-Type"))
}

async fn list_products(state: web::Data<ServerState>) -> impl Responder {
    let products = state.catalog.snapshot().await;
    debug!("Sending products: {}", products.len());
    HttpResponse::Ok().json(products)
}

async fn product_updates(state: web::Data<ServerState>) -> HttpResponse {
    let products = state.catalog.snapshot().await;
    let heartbeat = state.heartbeat;

    let stream = async_stream::stream! {
        yield Ok::<Bytes, actix_web::Error>(sse_frame(&StreamEvent::Update { products }));

        if let Some(period) = heartbeat {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                yield Ok(sse_frame(&StreamEvent::Heartbeat));
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn sse_frame(event: &StreamEvent) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        error!(error = %e, "Failed to encode stream event");
        "{}".to_string()
    });
    Bytes::from(format!("data: {data}\n\n"))
}

async fn method_not_allowed(req: HttpRequest) -> HttpResponse {
    if req.method() == Method::OPTIONS {
        HttpResponse::Ok().finish()
    } else {
        HttpResponse::MethodNotAllowed().finish()
    }
}

async fn not_found(req: HttpRequest) -> HttpResponse {
    if req.method() == Method::OPTIONS {
        HttpResponse::Ok().finish()
    } else {
        HttpResponse::NotFound().finish()
    }
}
