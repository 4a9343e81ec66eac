//! Collector-protocol ingestion core of a time-series monitoring agent.
//!
//! External plugins emit a newline-delimited, keyword-oriented text
//! protocol describing charts, dimensions, samples, labels, hosts and
//! remote function invocations. This crate consumes those streams: the
//! [`parser`] module holds the incremental line parser, keyword
//! dispatcher, deferred multi-line capture and the in-flight function
//! registry; [`sources::plugins`] discovers plugins and runs one parse
//! session per plugin; [`sink`] is the seam towards the time-series
//! database. The wire format itself lives in the `collector-protocol`
//! crate.

#![deny(missing_docs)]

pub mod config;
pub mod internal_events;
pub mod parser;
pub mod sink;
pub mod sources;
