//! Command handlers grouped by concern. Each returns the text to print.

pub(crate) mod catalogue;
pub(crate) mod queue;
pub(crate) mod repo;
pub(crate) mod request;
pub(crate) mod service;

#[cfg(test)]
pub(crate) mod fixtures;
