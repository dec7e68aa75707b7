//! Fuzzing harnesses for the pktring byte ring.
//!
//! The harness drives the real ring implementation (anonymous backend)
//! against a reference queue and checks the cursor invariants, the prefix
//! property, and the one-drop-record-per-burst rule after every operation.

pub mod harness;
