pub mod version;

pub use version::VersionRepository;
