pub mod metadata;

pub use metadata::MetadataRecord;
