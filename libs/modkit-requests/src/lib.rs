#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Fluent HTTP request builder for `ModKit`
//!
//! A [`RequestBuilder`] accumulates one request and the handling of its
//! response through chained setters:
//! - Method, scheme, host, paths and query params, resolved against an optional base URL
//! - Headers, with appending and replacing setters
//! - A single body producer (bytes, reader, writer callback, JSON, form, file)
//! - Validators that run in order and stop at the first failure
//! - A pass-through handler chain that consumes the body
//!
//! Executing the builder hands the assembled request to a [`Transport`]. The
//! bundled [`HyperTransport`] runs on hyper-util with rustls; any other
//! transport plugs in through the trait or [`transport_fn`].
//!
//! # Validation and handling
//!
//! With no validator registered the response status must be 2xx. Peek
//! validators share one buffer in front of the body, so handlers always see
//! the complete body. Reaching the end of the handler chain drains whatever
//! body is left.
//!
//! # Example
//!
//! ```ignore
//! use modkit_requests::{RequestBuilder, Slot};
//!
//! let user: Slot<User> = Slot::default();
//! RequestBuilder::new()
//!     .base_url("https://api.example.com/v1/")
//!     .path("users")
//!     .param("name", untrusted_name)
//!     .bearer(&token)
//!     .check_status([200])
//!     .check_content_type(["application/json"])
//!     .to_json(&user)
//!     .fetch()
//!     .await?;
//! ```

mod body;
mod builder;
mod config;
mod error;
mod handler;
mod response;
mod tls;
mod transport;
pub mod util;
mod validator;

pub use body::{BodySource, BodyWriter, JsonEncoder, ProducedBody, RequestBody, SharedReader, WriteFn};
pub use builder::RequestBuilder;
pub use config::{
    Config, DEFAULT_USER_AGENT, TlsRootConfig, TransportConfig, TransportSecurity, configure,
};
pub use error::{BodyError, BoxError, Error, HandleError, Stage, ValidationError};
pub use handler::{
    ConsumeBody, HandlerChain, Next, ResponseHandler, Slot, ToBytesBuffer, ToFile, ToHeaders,
    ToJson, ToText, ToWriter, chain_handlers, consume_body, to_bytes_buffer, to_file, to_headers,
    to_json, to_text, to_writer,
};
pub use response::{PeekableBody, Response, ResponseBody};
pub use transport::{FnTransport, HyperTransport, Transport, default_transport, transport_fn};
pub use validator::{
    CheckContentType, CheckPeek, CheckStatus, PeekFn, ResponseValidator, check_content_type,
    check_peek, check_status, default_validator, run_validators,
};
