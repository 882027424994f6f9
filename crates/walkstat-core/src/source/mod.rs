//! Storage backends the walkers read from.

pub mod mock;
pub mod s3;
pub mod traits;

pub use mock::{MockFs, MockStore};
pub use s3::S3Store;
pub use traits::{
    BucketInfo, EntryError, FileEntry, FileIter, FileSystem, ObjectInfo, ObjectIter, ObjectStore,
    RealFs, StoreError,
};
