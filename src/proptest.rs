//! Property-based tests for the memory graph using proptest.
//!
//! These tests check invariants that must hold after arbitrary sequences of
//! operations:
//!
//! - Connections are symmetric and never dangle
//! - Owners stay within capacity after a maintenance cycle
//! - Relevance never increases without an access
//! - Ranking is a pure function of store state and query
