use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const TOKEN: &str = "test-token";

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .json(),
            )
            .with(filter)
            .init();
    });
}

/// How the fake product endpoint answers.
#[derive(Clone)]
pub struct Behavior {
    pub status: u16,
    pub delay: Duration,
    pub hits: Arc<AtomicU64>,
}

impl Behavior {
    pub fn new(status: u16, delay: Duration) -> Self {
        Self {
            status,
            delay,
            hits: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn product(req: HttpRequest, behavior: web::Data<Behavior>) -> HttpResponse {
    behavior.hits.fetch_add(1, Ordering::SeqCst);
    if !behavior.delay.is_zero() {
        actix_web::rt::time::sleep(behavior.delay).await;
    }

    let authorized = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {TOKEN}"))
        .unwrap_or(false);
    if !authorized {
        return HttpResponse::Unauthorized().json(serde_json::json!({ "message": "unauthorized" }));
    }

    let status = actix_web::http::StatusCode::from_u16(behavior.status)
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(serde_json::json!({
        "code": behavior.status,
        "data": [{ "id": 1, "name": "Keyboard", "price": 150000 }]
    }))
}

/// Serves `GET /api/v1/product` on an ephemeral port.
pub fn start_target(behavior: Behavior) -> (SocketAddr, ServerHandle) {
    let data = web::Data::new(behavior);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/api/v1/product", web::get().to(product))
    })
    .workers(2)
    .bind(("127.0.0.1", 0))
    .expect("bind test server");

    let addr = server.addrs()[0];
    let server = server.run();
    let handle = server.handle();
    actix_web::rt::spawn(server);
    (addr, handle)
}

/// A local port with nothing listening on it.
pub fn closed_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
