//! Instrumented JSON endpoints with automatic installation.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42?fields=name
//!   curl -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!   curl http://localhost:3000/boom
//!
//! Each request logs one JSON event under the `waggle::events` target.

use std::sync::Arc;

use waggle::attach::{AutoInstall, Inventory};
use waggle::telemetry::{LogClient, Options};
use waggle::{AddField, App, Request, Response, Server, StatusCode};

#[derive(Debug, thiserror::Error)]
#[error("user {0} is locked")]
struct Locked(String);

#[tokio::main]
async fn main() -> Result<(), waggle::Error> {
    tracing_subscriber::fmt::init();

    let client = Arc::new(LogClient::new(Options::from_env()?));
    let auto = AutoInstall::new(client);
    if auto.available(&Inventory::builtin()) {
        auto.install_global();
    }

    let app = App::builder()
        .get("/users/:id", get_user)
        .post("/users", create_user)
        .get("/boom", boom)
        .build();

    Server::bind("0.0.0.0:3000")?.serve(app).await
}

// GET /users/:id
async fn get_user(req: Request) -> Result<Response, Locked> {
    let id = req.param("id").unwrap_or("unknown");
    req.add_field("user_id", id);
    if id == "13" {
        return Err(Locked(id.to_owned()));
    }
    Ok(Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes()))
}

// POST /users
async fn create_user(req: Request) -> Response {
    if req.body().is_empty() {
        return Response::status(StatusCode::BAD_REQUEST);
    }
    req.add_field("body_bytes", req.body().len());
    Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(req.body().to_vec())
}

// GET /boom
async fn boom(_req: Request) -> &'static str {
    panic!("the hive is on fire")
}
