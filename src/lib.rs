// Cloud Files - OpenStack Swift storage provider
// Token management, temp URLs, listing normalization and object transfers

pub mod logging;
pub mod providers;

pub use providers::{
    AuthContext, CloudFilesConfig, CloudFilesProvider, Credentials, Download, Entry, EntryKind,
    Metadata, ObjectStream, ProviderConfig, ProviderError, Settings, StorageProvider,
};
