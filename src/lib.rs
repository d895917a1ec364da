//! Charon: session and token authentication library.
//!
//! The library implements the session lifecycle engine described in the
//! project's design documents — refresh-token rotation with a grace
//! window for stale tokens, optimistic-locking persistence in a shared
//! session store, and a token-validation pipeline. The HTTP framework
//! adapter, configuration loading for a specific host, and the choice of
//! cryptographic signer for the transport layer are left to callers;
//! this crate only defines the narrow contracts they plug into.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod token;
pub mod transport;

pub use config::CharonConfig;
pub use context::{RequestContext, Tokens};
pub use engine::{SessionEngine, UpsertOptions};
pub use error::{AuthError, StoreError, TokenError};
pub use pipeline::{TokenKind, TokenPipeline};
pub use session::{Session, SessionType};
pub use store::SessionStore;
pub use token::{HmacTokenFactory, KeyProvider, TokenFactory};
pub use transport::SignatureTransport;
