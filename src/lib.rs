pub mod archive;
pub mod batch;
pub mod config;
pub mod constants;
pub mod corefit_errors;
pub mod dataset;
pub mod fitting;
pub mod records;
pub mod time;
