//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! A route table holds endpoints with handlers of *different* concrete types,
//! so each handler is erased behind `dyn ErasedHandler` and stored uniformly.
//!
//! ```text
//! async fn show(ctx: RequestContext) -> StatusResponse { … }   ← user writes this
//!        ↓ EndpointDef::new(show)
//! show.into_boxed_handler()                                    ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(show))                                    ← stored as BoxedHandler
//!        ↓
//! handler.call(ctx)  at request time                           ← one vtable dispatch
//!        ↓
//! Box::pin(async { show(ctx).await.into_reply() })             ← BoxFuture
//! ```
//!
//! Closures work too, which is how collection and login endpoints capture
//! their collaborators:
//!
//! ```rust,ignore
//! let articles = Arc::clone(&articles);
//! EndpointDef::new(move |_ctx: RequestContext| {
//!     let articles = Arc::clone(&articles);
//!     async move { articles.find_all().await.map(|docs| StatusResponse::ok(docs.into())) }
//! });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::envelope::{IntoReply, Reply};

/// A heap-allocated, type-erased future that resolves to a [`Reply`].
///
/// `Send + 'static` so the dispatcher can hand it to `tokio::spawn` and
/// observe a panic as a `JoinError` instead of losing the connection task.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Reply> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` because it appears in the return type of the public
/// `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: RequestContext) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid endpoint handler.
///
/// Satisfied automatically by any `async fn` or closure with the shape:
///
/// ```text
/// async fn name(ctx: RequestContext) -> impl IntoReply
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
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Newtype bridging a concrete handler `F` to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn call(&self, ctx: RequestContext) -> BoxFuture {
        let fut = (self.0)(ctx);
        Box::pin(async move { fut.await.into_reply() })
    }
}
