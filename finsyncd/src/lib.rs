pub mod daemon;
pub mod sync;
pub mod testdata;
