//! Common utilities and types shared across sealdoc modules.
//!
//! This module provides the error taxonomy used by every layer, so callers
//! can tell "wrong password, please retry" apart from "no usable key" and
//! from "this file is corrupt".

pub mod error;

pub use error::{Error, Result};
