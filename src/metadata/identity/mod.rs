//! Assembly identity for .NET assemblies.
//!
//! # Module Structure
//!
//! - [`assembly`] - Complete assembly identity with name, version, culture, and strong name
//! - [`cryptographic`] - Public keys, public key tokens and their derivation
//! - [`wildcard`] - Declared versions with `*` wildcards and their one-time resolution
//!
//! # ECMA-335 References
//!
//! - **Section II.6.3**: Referencing assemblies
//! - **Section II.22.5**: AssemblyRef table
//! - **Section II.6.2.1.3**: PublicKeyToken

pub mod assembly;
pub mod cryptographic;
pub mod wildcard;

pub use assembly::{AssemblyIdentity, AssemblyVersion};
pub use cryptographic::{AssemblyHashAlgorithm, Identity};
pub use wildcard::{BuildStamp, VersionPattern};
