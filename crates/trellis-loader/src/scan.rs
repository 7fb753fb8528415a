//! The capability scanner.
//!
//! Walks every compiled unit of every loaded pack and indexes one
//! [`AnnotatedElement`](crate::element::AnnotatedElement) per marker
//! occurrence: unit-level markers first, then function markers in
//! declaration order, then field markers in declaration order. Units are
//! read raw from the pack store; the transformer chains play no part here.
//! Both marker retentions are scanned identically.

use crate::element::AnnotatedElement;
use crate::error::{LoaderResult, Problem};
use crate::loader::Loader;
use crate::pack::{Pack, ScanHook};
use crate::phase::{Phase, ProblemReport};
use std::sync::Arc;
use tracing::debug;
use trellis_unit::Unit;

/// Scans every loaded pack for marked elements.
pub struct ScanPacksPhase;

impl Phase for ScanPacksPhase {
    type Output = ();

    fn name(&self) -> &'static str {
        "ScanPacks"
    }

    fn run(self, loader: &mut Loader, report: &mut ProblemReport) {
        let mut packs = loader.take_packs();
        let hooks = loader.take_scan_hooks();

        for pack in packs.iter_mut() {
            if let Err(e) = scan_pack(pack, &hooks) {
                report.record(
                    pack.id().to_string(),
                    Problem::new(e).critical().subject(pack.id()),
                );
            }
        }

        loader.restore_scan_hooks(hooks);
        loader.restore_packs(packs);
    }
}

fn scan_pack(pack: &mut Pack, hooks: &[Box<dyn ScanHook>]) -> LoaderResult<()> {
    let store = Arc::clone(pack.store());
    let unit_paths = store.unit_paths()?;
    debug!("scanning {} units of pack '{}'", unit_paths.len(), pack.id());

    for unit_path in unit_paths {
        let bytes = store.read(&unit_path)?;
        let unit = Unit::parse(&bytes)?;
        process_unit(pack, &unit_path, &unit, hooks);
    }

    Ok(())
}

fn process_unit(pack: &mut Pack, unit_path: &str, unit: &Unit, hooks: &[Box<dyn ScanHook>]) {
    let pack_id = pack.id().to_string();

    for marker in &unit.markers {
        emit(
            pack,
            AnnotatedElement::for_type(&pack_id, unit_path, unit, marker),
            hooks,
        );
    }

    for function in &unit.functions {
        for marker in &function.markers {
            emit(
                pack,
                AnnotatedElement::for_function(&pack_id, unit_path, unit, function, marker),
                hooks,
            );
        }
    }

    for field in &unit.fields {
        for marker in &field.markers {
            emit(
                pack,
                AnnotatedElement::for_field(&pack_id, unit_path, unit, field, marker),
                hooks,
            );
        }
    }
}

fn emit(pack: &mut Pack, element: AnnotatedElement, hooks: &[Box<dyn ScanHook>]) {
    let element = Arc::new(element);
    pack.register_element(Arc::clone(&element));
    for hook in hooks {
        hook.element_scanned(pack, &element);
    }
}
