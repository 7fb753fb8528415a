//! Binary unit transformations.
//!
//! A transformer is a predicate-gated rewrite from raw unit bytes to
//! modified unit bytes, or a rejection. Transformers register into ordered
//! chains; the target resolver runs the pre-definition chain before a unit
//! is materialized and the post-definition chain right before the defined
//! unit is handed to the caller. Chains are never cached: every resolution
//! of a unit reapplies the full chain.

use crate::error::{LoaderError, LoaderResult};
use tracing::debug;

/// A named, predicate-gated binary rewrite.
pub trait Transformer: Send + Sync {
    /// Stable name, used for dedup and logging.
    fn name(&self) -> &str;

    /// Whether this transformer applies to the given unit.
    fn can_transform(&self, unit_name: &str) -> bool;

    /// Rewrite the unit, or return `None` to reject it entirely. Rejection
    /// fails the whole resolution; partial chain output is never observable.
    fn transform(&self, unit_name: &str, bytes: Vec<u8>) -> Option<Vec<u8>>;
}

/// An ordered, name-deduplicated collection of transformers.
#[derive(Default)]
pub struct TransformerChain {
    transformers: Vec<Box<dyn Transformer>>,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transformer at the end of the chain. A transformer with a
    /// name already present is ignored.
    pub fn install(&mut self, transformer: Box<dyn Transformer>) {
        if self.transformers.iter().any(|t| t.name() == transformer.name()) {
            debug!("transformer '{}' already installed", transformer.name());
            return;
        }
        debug!("installing transformer '{}'", transformer.name());
        self.transformers.push(transformer);
    }

    /// Apply every applicable transformer in insertion order, each feeding
    /// the next. Every applicable transformer always runs; there is no
    /// short-circuit.
    pub fn apply(&self, unit_name: &str, mut bytes: Vec<u8>) -> LoaderResult<Vec<u8>> {
        for transformer in &self.transformers {
            if transformer.can_transform(unit_name) {
                bytes = transformer.transform(unit_name, bytes).ok_or_else(|| {
                    LoaderError::TransformRejected {
                        unit: unit_name.to_string(),
                        transformer: transformer.name().to_string(),
                    }
                })?;
            }
        }
        Ok(bytes)
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

/// The pre-definition and post-definition chains, mutable only until the
/// bootstrap's freeze point. Owned by the loader, passed by reference to
/// installers, then sealed and handed as a whole to the target resolver.
#[derive(Default)]
pub struct Transformers {
    pre: TransformerChain,
    post: TransformerChain,
    sealed: bool,
}

impl Transformers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register into the pre-definition chain. Fails once sealed.
    pub fn install_pre(&mut self, transformer: Box<dyn Transformer>) -> LoaderResult<()> {
        self.check_open()?;
        self.pre.install(transformer);
        Ok(())
    }

    /// Register into the post-definition chain. Fails once sealed.
    pub fn install_post(&mut self, transformer: Box<dyn Transformer>) -> LoaderResult<()> {
        self.check_open()?;
        self.post.install(transformer);
        Ok(())
    }

    fn check_open(&self) -> LoaderResult<()> {
        if self.sealed {
            return Err(LoaderError::usage(
                "transformer registration is closed after plugin initialization",
            ));
        }
        Ok(())
    }

    /// Close registration permanently.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn pre(&self) -> &TransformerChain {
        &self.pre
    }

    pub fn post(&self) -> &TransformerChain {
        &self.post
    }
}
