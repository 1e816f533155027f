//! Image upload service: a saga that stores originals and records tasks, and a
//! worker that applies image operations from a durable message channel.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
