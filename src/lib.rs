//! Timeline thread collector library.
//!
//! A service that fetches a user's posts through an upstream proxy API,
//! reconstructs self-reply threads from the flat timeline, and serves the
//! grouped result over a JSON web API, with optional persistence to an
//! external save store.

pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod model;
pub mod normalize;
pub mod store;
pub mod text;
pub mod threading;
pub mod web;
