//! Cross-module integration tests.

mod client_api_test;
