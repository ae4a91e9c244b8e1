//! codegate-state: persistence collaborators for the codegate validation pipeline
//!
//! ## Layer 0 - Data/Persistence
//!
//! The pipeline never touches a relational schema directly. It reads uploaded
//! artifacts through [`ArtifactStore`] and writes validation state through
//! [`VersionStore`].
//!
//! ## Key Components
//!
//! - `ValidationStatus` / `ValidationRecord`: the persisted verdict shape
//! - `FsArtifactStore`: artifacts stored as files under a root directory
//! - `SurrealVersionStore`: version state in SurrealDB (embedded or remote)
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
mod fs_store;
mod migrations;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use fs_store::FsArtifactStore;
pub use storage_traits::{
    ArtifactStore, CheckDetails, QualitySummary, SecuritySummary, StorageResult, TestsSummary,
    ValidationRecord, ValidationStatus, VersionEntry, VersionId, VersionStore,
};
pub use surreal_store::SurrealVersionStore;
