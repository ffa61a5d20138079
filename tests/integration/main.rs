//! Integration tests: orchestrated flows over scripted and mock HTTP transports

mod cache_persistence;
mod fixtures;
mod http_transport;
mod orchestrator_flow;
mod query_staleness;
