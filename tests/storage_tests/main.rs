//! Storage integration tests
