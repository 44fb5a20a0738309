pub mod source;
pub mod wfdb;
