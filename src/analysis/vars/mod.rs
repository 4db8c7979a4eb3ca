//! Variable typing, version merging and the final variable table.
//!
//! [`VarVersionsProcessor::set_var_versions`] drives everything: it versions
//! the tree, infers a type interval per version with [`VarTypeProcessor`],
//! merges versions that can share a name and compacts the survivors into the
//! [`VarProcessor`] table. [`VarDefinitionHelper`] then decides where each
//! variable is declared.
//!
//! # Type Lattice
//!
//! Minimum types only widen and maximum types only narrow. Within the integer
//! family `bytechar ⊂ byte`, `bytechar ⊂ shortchar ⊂ short`, `shortchar ⊂ char`
//! and everything below `int`; `boolean`, the floating point types, `long`
//! and references are separate families.
//!
//! # Usage
//!
//! ```rust,ignore
//! use classflow::analysis::vars::{VarDefinitionHelper, VarVersionsProcessor};
//!
//! let vars = VarVersionsProcessor::set_var_versions(&mut ctx, &mut tree, &method)?;
//! let sites = VarDefinitionHelper::place_definitions(&mut tree, &vars, &method);
//! ```

pub mod definitions;
mod liveness;
pub mod processor;
pub mod types;
pub mod versions;

pub use definitions::{DefinitionSite, VarDefinitionHelper};
pub use processor::{FinalType, VarInfo, VarProcessor};
pub use types::VarTypeProcessor;
pub use versions::VarVersionsProcessor;
