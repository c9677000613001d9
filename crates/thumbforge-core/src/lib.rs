//! Core request model for the thumbforge thumbnail service.
//!
//! This crate owns everything needed to turn a request path into a
//! validated transformation plan and to bind that plan to a shared secret:
//!
//! - [`parser::UrlParser`]: the URL grammar and filter tokenizer
//! - [`ops::Operation`]: the closed set of typed image operations
//! - [`plan::RequestPlan`]: the ordered, validated operation plan
//! - [`signature::Signer`]: the HMAC-SHA256 signature protocol
//!
//! The crate is deliberately free of I/O so it can be fuzzed and tested in
//! isolation; the transform and server crates consume it.

pub mod error;
pub mod ops;
pub mod parser;
pub mod plan;
pub mod signature;

pub use error::{ParseError, SignatureError};
pub use ops::{FillColor, FitMode, Operation, OutputFormat, DEFAULT_QUALITY};
pub use parser::{ParserLimits, UrlParser};
pub use plan::{Alias, RequestPlan};
pub use signature::Signer;
