//! The series of knobs that you can use to configure `sergw`.
//!
//! NOTE: this doesn't include any flags potentially included in shared
//! libraries like those used for [`log`].

pub mod cli;
pub mod env;
