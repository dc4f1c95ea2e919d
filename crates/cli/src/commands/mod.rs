pub mod edit;
pub mod merge;
pub mod number;
pub mod query;
pub mod transform;
