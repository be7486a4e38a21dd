//! Integration tests for fswatch
//!
//! Every scenario drives real files in a scratch directory and checks
//! what the observer saw, in order.

mod common;
mod scenarios;
