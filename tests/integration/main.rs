//! Integration tests: the full tick pipeline against in-memory sources.

mod mock_sources;
mod simulation;
