//! End-to-end tests against the public `TransferMarket` interface.

mod concurrency;
mod scenarios;
mod support;
