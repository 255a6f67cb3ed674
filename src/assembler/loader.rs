//! The host boundary for `.arch`, `.include`, and `.module` (§4.3, §5).
//!
//! The assembler core never opens a file: resolving an architecture name or
//! a module name to actual bytes is left to whatever embeds the assembler.
//! The CLI (`r824asm`) supplies a loader that reads sibling files relative
//! to the input path.

use crate::arch::ArchSpec;

/// Resolves `.arch`/`.include`/`.module` names to content.
pub trait ArchLoader {
    /// Load and parse the architecture document named by `.arch NAME`.
    fn load_arch(&mut self, name: &str) -> Result<ArchSpec, Box<dyn std::error::Error + Send + Sync>>;

    /// Load the source text named by `.include NAME` / `.module NAME`.
    fn load_module(&mut self, name: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

/// A loader with nothing behind it: every `.arch`/`.include`/`.module` line
/// fails. Useful for assembling a self-contained source string (tests, a
/// library caller with no filesystem) where those directives are never
/// expected to appear.
pub struct NullArchLoader;

#[derive(Debug, thiserror::Error)]
#[error("no architecture/module loader is configured")]
pub struct NoLoaderError;

impl ArchLoader for NullArchLoader {
    fn load_arch(&mut self, _name: &str) -> Result<ArchSpec, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(NoLoaderError))
    }

    fn load_module(&mut self, _name: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(NoLoaderError))
    }
}
