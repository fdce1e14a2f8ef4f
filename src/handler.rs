//! Handler trait and type erasure.
//!
//! Every stage of a request chain, whether a route handler, a router, a
//! mounted app or a middleware, satisfies one contract:
//!
//! ```text
//! ErasedHandler::call(Request) -> BoxFuture<Result<Response, HandlerError>>
//! ```
//!
//! That is what lets the instrumentation wrap "the next handler" without
//! knowing what it is, and sit at any position of a chain.
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }   ← user writes this
//!        ↓ router.get("/", hello)
//! hello.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                       ← stored as BoxedHandler
//!        ↓
//! handler.call(req)  at request time               ← one vtable dispatch
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::StatusCode;

use crate::error::HandlerError;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// What every stage of the chain resolves to.
pub type HandlerResult = Result<Response, HandlerError>;

/// A heap-allocated, type-erased future resolving to a [`HandlerResult`].
pub type BoxFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// The dispatch interface shared by handlers, routers and middleware.
///
/// Implement this directly when writing middleware; plain async functions get
/// it through [`Handler`].
pub trait ErasedHandler: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler>;

// ── Handler results ───────────────────────────────────────────────────────────

/// Anything an async handler may return.
///
/// Successful values go through [`IntoResponse`]; `Err` values become a
/// [`HandlerError`] that travels back up the chain untouched.
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> HandlerResult;
}

macro_rules! infallible_results {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoHandlerResult for $ty {
                fn into_handler_result(self) -> HandlerResult {
                    Ok(self.into_response())
                }
            }
        )*
    };
}

infallible_results!(Response, &'static str, String, StatusCode);

impl<T, E> IntoHandlerResult for Result<T, E>
where
    T: IntoResponse,
    E: Into<HandlerError>,
{
    fn into_handler_result(self) -> HandlerResult {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any `async fn` with
/// the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoHandlerResult
/// ```
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Boxes an async function into the chain's common handler type.
pub fn boxed(handler: impl Handler) -> BoxedHandler {
    handler.into_boxed_handler()
}

/// Bridges a concrete async function to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}
