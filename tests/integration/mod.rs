//! Integration tests for fleetcert
//!
//! These tests drive the orchestrator and the HTTP ingress with mocked
//! collaborators and an in-memory ledger.

mod adapter_tests;
