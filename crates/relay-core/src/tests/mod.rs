//! Behavior tests for backends and the dispatcher.
//!
//! - `harness.rs`      - Mock transports, signal pumping, log capture
//! - `lifecycle.rs`    - Connection state machine and status derivation
//! - `flush.rs`        - Queueing while offline and ordered flush on connect
//! - `overflow.rs`     - Drop-oldest trimming and its amortized check
//! - `reconnect.rs`    - Fixed-interval retries and stale event handling
//! - `dispatcher.rs`   - Routing through backend tasks

mod reconnect;
