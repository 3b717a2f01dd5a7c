//! End-to-end tests against real listeners

mod e2e;
mod fixtures;
