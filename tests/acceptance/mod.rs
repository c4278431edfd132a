//! Host-level acceptance tests for rteval.

mod common;
mod host_test;
mod run_test;
