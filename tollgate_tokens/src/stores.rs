//! Token stores

mod in_memory;
#[cfg(feature = "file")]
#[cfg_attr(docsrs, doc(cfg(feature = "file")))]
pub mod file;

pub use in_memory::InMemoryTokenStore;

#[cfg(feature = "file")]
pub use file::FileTokenStore;
