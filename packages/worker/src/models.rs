pub mod archive;
pub mod artifacts;
pub mod build;
pub mod junit;
pub mod marking;
pub mod retention;
pub mod sandbox;
