pub mod blob;
pub mod secrets;
pub mod store;

pub use blob::BlobStore;
pub use secrets::SecretBox;
pub use store::Store;
