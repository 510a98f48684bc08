// Storage module: object storage for the status document

pub mod b2;

pub use b2::{B2Client, ObjectStore};
