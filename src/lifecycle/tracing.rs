//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `tracing-subscriber` formatter driven by
//! `RUST_LOG`. Every layer logs with structured fields (`model`, `action`, `generation`,
//! `url`, `status`) so output can be filtered per model type.
//!
//! ## What Gets Traced
//!
//! - **Assembly**: `info` once per assembled model type, `warn` for a failing mixin
//! - **Actions**: `debug` when an action starts or a stale result is discarded, `warn`
//!   when an action fails or is aborted by a hook
//! - **Hooks**: `warn` for errors raised by after-phase hooks (they are ignored)
//! - **Memory server**: `info` for lifecycle and writes, `warn` for rejected requests
//!
//! ## Usage
//!
//! ```bash
//! # Assembly and server lifecycle only
//! RUST_LOG=info cargo run
//!
//! # Action flow, decode and populate
//! RUST_LOG=debug cargo run
//!
//! # Just the runtime
//! RUST_LOG=restbind::runtime=debug cargo run
//! ```
//!
//! A fetch that hits a missing record reads like this with `RUST_LOG=debug`:
//!
//! ```text
//! DEBUG Action started model="bike" action="fetch" generation=1 url=/bikes/9 method=GET
//! DEBUG Request method=GET url=/bikes/9
//!  WARN Request rejected url=/bikes/9 status=404
//!  WARN Action failed model="bike" action="fetch" generation=1 status=404 error=...
//! ```

pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false) // Models are identified by the `model` field
        .compact()
        .init();
}
