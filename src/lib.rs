#![no_std]
#![cfg_attr(docs_rs, feature(doc_cfg))]

//! A streaming PNG codec.
//!
//! The decoder accepts input in fragments of any size and gives back image
//! rows as soon as they're final. The encoder takes rows one at a time and
//! gives back PNG bytes as soon as they're ready. See the [`png`] module for
//! the details.
//!
//! Logging goes through the [`log`](https://docs.rs/log) facade.

extern crate alloc;

#[cfg(target_pointer_width = "16")]
compile_error!("this crate assumes 32-bit or bigger pointers!");

mod parser_helpers;
pub(crate) use parser_helpers::*;

mod error;
pub use error::*;

pub mod png;
