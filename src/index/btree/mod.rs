pub mod error;
pub mod header;
pub mod index;
pub mod node;
pub mod serialization;

pub use error::BTreeError;
pub use index::iterator::TreeIterator;
pub use index::BTreeIndex;
pub use node::{InternalNode, LeafNode, TreeNode};
