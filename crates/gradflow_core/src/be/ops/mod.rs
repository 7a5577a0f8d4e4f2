pub mod binary;
pub mod copy;
pub mod reduction;
pub mod unary;
