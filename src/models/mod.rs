pub mod approval;
pub mod identity;
pub mod relation;
