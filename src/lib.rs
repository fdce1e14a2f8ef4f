//! # waggle
//!
//! One structured telemetry event per HTTP request.
//!
//! The [`Instrument`](middleware::Instrument) middleware wraps the next
//! handler in a chain. For every request it records method, path, host,
//! client address, user agent, query string, status, latency, errors, the
//! matched route, trace identifiers and whatever the application attached
//! along the way, then hands the event to a [`telemetry::Client`]. It never
//! changes what the wrapped handler returns: responses, errors and panics all
//! pass through untouched.
//!
//! ## Manual installation
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use waggle::middleware::{Instrument, Routing};
//! use waggle::telemetry::{LogClient, Options};
//! use waggle::{AddField, App, Request, Response, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), waggle::Error> {
//!     let client = Arc::new(LogClient::new(Options::from_env()?));
//!     let app = App::builder()
//!         .layer(Instrument::builder().client(client).routing(Routing::Pattern).build())
//!         .get("/users/:id", get_user)
//!         .post("/users", create_user)
//!         .build();
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     req.add_field("user_id", id);
//!     Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//! }
//!
//! async fn create_user(req: Request) -> Response {
//!     if req.body().is_empty() {
//!         return Response::status(StatusCode::BAD_REQUEST);
//!     }
//!     Response::builder()
//!         .status(StatusCode::CREATED)
//!         .header("location", "/users/99")
//!         .json(b"{}".to_vec())
//! }
//! ```
//!
//! ## Automatic installation
//!
//! [`attach::AutoInstall`] registers a construction hook for [`App`] and a
//! boot initializer for [`Application`], so every app built afterwards is
//! instrumented without touching its definition.

mod app;
mod application;
mod error;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod attach;
pub mod fields;
pub mod handler;
pub mod logger;
pub mod middleware;
pub mod telemetry;
pub mod trace;

pub use app::{App, AppBuilder, AppId, ConstructContext, ConstructHook, Hooks};
pub use application::{Application, ApplicationBuilder, BootContext, Initializer, Initializers};
pub use attach::AddField;
pub use error::{Error, HandlerError};
pub use handler::Handler;
pub use http::StatusCode;
pub use logger::Logger;
pub use method::{Method, UnknownMethod};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response};
pub use router::{RouteMatch, RouteSlot, Router};
pub use server::Server;
