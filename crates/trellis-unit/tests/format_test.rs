//! Integration tests for the unit format, bundles and pack stores.

use std::path::Path;
use tempfile::TempDir;
use trellis_unit::{
    unit_path, Bundle, BundleBuilder, FunctionMember, Marker, MarkerValue, MemberFlags, PackStore,
    Retention, Unit, UnitError, UnitFlags, UnitSource,
};

fn sample_unit(name: &str) -> Unit {
    Unit {
        format: 1,
        name: name.to_string(),
        flags: UnitFlags { public: true },
        markers: vec![Marker {
            marker: "trellis.api.LoadWith".to_string(),
            retention: Retention::Build,
            values: vec![(
                "value".to_string(),
                MarkerValue::List(vec![MarkerValue::TypeRef("acme.Other".to_string())]),
            )],
        }],
        functions: vec![FunctionMember {
            name: "boot".to_string(),
            params: vec![],
            returns: None,
            constructor: false,
            flags: MemberFlags {
                public: true,
                static_: true,
            },
            markers: vec![],
        }],
        fields: vec![],
        co_load: vec![],
    }
}

fn write_file(path: &Path, bytes: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn test_unit_survives_bundle_round_trip() {
    let temp = TempDir::new().unwrap();
    let unit = sample_unit("acme.Widget");

    let bundle_path = temp.path().join("pack.tpk");
    BundleBuilder::new()
        .entry(&unit_path("acme.Widget"), &unit.encode().unwrap())
        .write_to(&bundle_path)
        .unwrap();

    let bundle = Bundle::open(&bundle_path).unwrap();
    let bytes = bundle.read(&unit_path("acme.Widget")).unwrap();
    let parsed = Unit::parse(&bytes).unwrap();

    assert_eq!(parsed.name, "acme.Widget");
    assert_eq!(parsed.markers.len(), 1);
    assert_eq!(
        parsed.markers[0].value("value"),
        Some(&MarkerValue::List(vec![MarkerValue::TypeRef(
            "acme.Other".to_string()
        )]))
    );
    assert!(parsed.function("boot").is_some());
}

#[test]
fn test_store_load_unit_from_dir_and_bundle() {
    let temp = TempDir::new().unwrap();
    let unit = sample_unit("acme.Widget");

    // Directory-backed store.
    let dir_root = temp.path().join("dir-pack");
    write_file(&dir_root.join(unit_path("acme.Widget")), &unit.encode().unwrap());
    let dir_store = PackStore::open(&dir_root).unwrap();
    let bytes = dir_store.load_unit("acme.Widget").unwrap();
    assert_eq!(Unit::parse(&bytes).unwrap().name, "acme.Widget");

    // Bundle-backed store, same contract.
    let bundle_path = temp.path().join("pack.tpk");
    BundleBuilder::new()
        .entry(&unit_path("acme.Widget"), &unit.encode().unwrap())
        .write_to(&bundle_path)
        .unwrap();
    let bundle_store = PackStore::open(&bundle_path).unwrap();
    let bytes = bundle_store.load_unit("acme.Widget").unwrap();
    assert_eq!(Unit::parse(&bytes).unwrap().name, "acme.Widget");

    // Missing units fail with not-found either way.
    assert!(matches!(
        dir_store.load_unit("acme.Missing"),
        Err(UnitError::NotFound(_))
    ));
    assert!(matches!(
        bundle_store.load_unit("acme.Missing"),
        Err(UnitError::NotFound(_))
    ));
}

#[test]
fn test_locate_reports_display_paths() {
    let temp = TempDir::new().unwrap();
    let bundle_path = temp.path().join("pack.tpk");
    BundleBuilder::new()
        .entry("trellis.pack.json", b"{}")
        .write_to(&bundle_path)
        .unwrap();

    let store = PackStore::open(&bundle_path).unwrap();
    let located = store.locate("trellis.pack.json");
    assert_eq!(located.len(), 1);
    assert!(located[0].to_string().ends_with("pack.tpk!/trellis.pack.json"));
    assert_eq!(located[0].read().unwrap(), b"{}");
}
