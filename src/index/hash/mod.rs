pub mod bucket;
pub mod directory;
pub mod error;
pub mod table;

pub use bucket::BucketPage;
pub use directory::DirectoryPage;
pub use error::HashTableError;
pub use table::ExtendibleHashTable;
