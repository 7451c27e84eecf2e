pub mod config;
pub mod deblend;
pub mod psf_match;
