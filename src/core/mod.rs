// Core modules implementing buffers, argument decoding, fault isolation, and error modeling.
pub mod diag;
pub mod error;
pub mod fault;
pub mod format;
pub mod output;
pub mod parser;
