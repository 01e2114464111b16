//! Integration tests for stackmove-lib.

mod common;
mod pipeline_tests;
