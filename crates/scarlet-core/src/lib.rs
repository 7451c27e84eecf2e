pub mod blend;
pub mod component;
pub mod consts;
pub mod constraint;
pub mod convolve;
pub mod deblend;
pub mod error;
pub mod prox;
pub mod psf;
pub mod scene;
