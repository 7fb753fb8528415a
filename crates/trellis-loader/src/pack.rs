//! Loaded packs and their marker indices.

use crate::descriptor::PackDescriptor;
use crate::element::AnnotatedElement;
use crate::entrypoint::EntrypointContainer;
use std::collections::HashMap;
use std::sync::Arc;
use trellis_unit::PackStore;

/// One loaded content pack.
pub struct Pack {
    id: String,
    descriptor: PackDescriptor,
    store: Arc<PackStore>,
    root: String,
    elements: Vec<Arc<AnnotatedElement>>,
    by_marker: HashMap<String, Vec<Arc<AnnotatedElement>>>,
    entrypoints: Vec<EntrypointContainer>,
}

impl Pack {
    pub fn new(descriptor: PackDescriptor, store: Arc<PackStore>, root: String) -> Self {
        Self {
            id: descriptor.id.clone(),
            descriptor,
            store,
            root,
            elements: Vec::new(),
            by_marker: HashMap::new(),
            entrypoints: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &PackDescriptor {
        &self.descriptor
    }

    pub fn store(&self) -> &Arc<PackStore> {
        &self.store
    }

    /// Display path of the pack root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Every scanned element, in within-unit declaration order.
    pub fn elements(&self) -> &[Arc<AnnotatedElement>] {
        &self.elements
    }

    /// Scanned elements carrying the given marker type.
    pub fn elements_with_marker(&self, marker: &str) -> &[Arc<AnnotatedElement>] {
        self.by_marker.get(marker).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entrypoint containers derived during scanning.
    pub fn entrypoints(&self) -> &[EntrypointContainer] {
        &self.entrypoints
    }

    /// Index one scanned element into the flat list and the by-marker map.
    pub(crate) fn register_element(&mut self, element: Arc<AnnotatedElement>) {
        self.by_marker
            .entry(element.marker().to_string())
            .or_default()
            .push(Arc::clone(&element));
        self.elements.push(element);
    }

    pub(crate) fn add_entrypoint(&mut self, entrypoint: EntrypointContainer) {
        self.entrypoints.push(entrypoint);
    }
}

/// A side-registration hook offered every scanned element. Hooks are pure
/// reactions to a single element; they may rely on within-pack, within-unit
/// declaration order, never on ordering across packs.
pub trait ScanHook: Send + Sync {
    fn element_scanned(&self, pack: &mut Pack, element: &Arc<AnnotatedElement>);
}
