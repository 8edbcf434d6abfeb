use std::sync::{Arc, Barrier};
use std::thread;

use datatree_core::{registry, PropertyDeclaration, SemanticType, TypeDeclaration};

// Kept as the only test in this binary so cache_size is not shared
#[test]
fn test_concurrent_first_resolution_caches_once() {
    const THREADS: usize = 8;

    assert!(registry::declare(
        TypeDeclaration::new("concurrent.Node")
            .property(PropertyDeclaration::new("label", SemanticType::String))
            .property(PropertyDeclaration::new("weight", SemanticType::Float).default(1.0)),
    ));
    let before = registry::cache_size();

    let barrier = Barrier::new(THREADS);
    let infos: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    registry::register_or_get("concurrent.Node").unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(infos.len(), THREADS);
    for info in &infos[1..] {
        assert!(Arc::ptr_eq(&infos[0], info));
    }
    assert!(Arc::ptr_eq(
        &infos[0],
        &registry::register_or_get("concurrent.Node").unwrap()
    ));
    assert_eq!(registry::cache_size(), before + 1);
    assert_eq!(infos[0].len(), 2);
}
