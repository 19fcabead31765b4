//! Pipeline stages of one conversion job.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the driver in [`crate::convert`] reads as the sequence below.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ (supervisor) ──▶ client::submit ──▶ poll ──▶ client::fetch_result
//! (validate,  (ensure_ready)   (multipart)      (status    (JSON result)
//!  base64)                                       loop)
//! ```
//!
//! 1. [`input`]  — validate the job object and base64-decode the file
//! 2. [`client`] — the three conversion-service endpoints; the only stage
//!    with network I/O besides the health probe
//! 3. [`poll`]   — status normalisation and the bounded polling loop

pub mod client;
pub mod input;
pub mod poll;
