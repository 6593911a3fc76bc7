mod store;

pub use store::{
    AssetPresence, AssetStore, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_MANIFEST_FILE,
    MANIFEST_TMP_SUFFIX, PARTIAL_SUFFIX,
};
