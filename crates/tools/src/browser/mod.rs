//! Browser plumbing: CDP transport, the shared session lifecycle,
//! on-disk cookie records, and the login-wait state machine.

pub mod cdp;
pub mod cookies;
pub mod login;
pub mod session;
