pub mod extract;
pub mod index;
