pub mod be;
pub mod buffer;
pub mod device;
pub mod dtype;
pub mod error;
pub mod layout;
