use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, OnceLock};
use std::thread;
use std::time::Duration;

use opizontas_registry::services::registry::{ServiceFactory, ServiceSource};
use opizontas_registry::{
    FactoryError, ModuleId, Properties, ServiceObject, ServiceRegistration, ServiceRegistry,
};

const OWNER: ModuleId = ModuleId(1);
const A: ModuleId = ModuleId(2);
const B: ModuleId = ModuleId(3);

#[derive(Default)]
struct Counts {
    gets: AtomicUsize,
    ungets: AtomicUsize,
}

impl Counts {
    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn ungets(&self) -> usize {
        self.ungets.load(Ordering::SeqCst)
    }
}

// 每次调用返回新对象，可选延迟和失败模式
struct CountingFactory {
    counts: Arc<Counts>,
    delay: Option<Duration>,
    fail_get: bool,
    fail_unget: bool,
}

impl CountingFactory {
    fn new(counts: &Arc<Counts>) -> Self {
        Self {
            counts: counts.clone(),
            delay: None,
            fail_get: false,
            fail_unget: false,
        }
    }
}

impl ServiceFactory for CountingFactory {
    fn get_service(
        &self,
        consumer: ModuleId,
        _registration: &ServiceRegistration,
    ) -> Result<ServiceObject, FactoryError> {
        let n = self.counts.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.fail_get {
            return Err(FactoryError::failed("backend unavailable"));
        }
        Ok(ServiceObject::new(format!("{consumer}/{n}")))
    }

    fn unget_service(
        &self,
        _consumer: ModuleId,
        _registration: &ServiceRegistration,
        _service: ServiceObject,
    ) -> Result<(), FactoryError> {
        self.counts.ungets.fetch_add(1, Ordering::SeqCst);
        if self.fail_unget {
            return Err(FactoryError::failed("cleanup failed"));
        }
        Ok(())
    }
}

fn register(registry: &ServiceRegistry, factory: CountingFactory) -> ServiceRegistration {
    registry
        .register_service(
            OWNER,
            ["Foo"],
            ServiceSource::factory(factory),
            Properties::new(),
        )
        .expect("Failed to register factory service")
}

#[test]
fn test_factory_called_once_per_consumer() {
    let registry = ServiceRegistry::default();
    let counts = Arc::new(Counts::default());
    let reference = register(&registry, CountingFactory::new(&counts)).reference();

    let first = registry
        .get_service(A, &reference)
        .expect("Failed to get service for A");
    let second = registry
        .get_service(A, &reference)
        .expect("Failed to get service again for A");
    let other = registry
        .get_service(B, &reference)
        .expect("Failed to get service for B");

    assert!(first.same_object(&second));
    assert!(!first.same_object(&other));
    assert_eq!(counts.gets(), 2);
    assert_eq!(registry.usage_count(A, &reference), 2);

    assert!(registry.unget_service(A, &reference));
    assert_eq!(counts.ungets(), 0);
    assert!(registry.unget_service(A, &reference));
    assert_eq!(counts.ungets(), 1);
    assert!(!registry.unget_service(A, &reference));
    assert_eq!(counts.ungets(), 1);

    // 新的使用周期重新调用工厂
    let again = registry
        .get_service(A, &reference)
        .expect("Failed to get service in new usage period");
    assert!(!again.same_object(&first));
    assert_eq!(counts.gets(), 3);
}

#[test]
fn test_unregister_releases_every_usage() {
    let registry = ServiceRegistry::default();
    let counts = Arc::new(Counts::default());
    let registration = register(&registry, CountingFactory::new(&counts));
    let reference = registration.reference();

    registry.get_service(A, &reference).expect("Failed to get for A");
    registry.get_service(A, &reference).expect("Failed to get for A again");
    registry.get_service(B, &reference).expect("Failed to get for B");

    registry
        .unregister_service(OWNER, &registration)
        .expect("Failed to unregister service");

    assert_eq!(counts.gets(), 2);
    assert_eq!(counts.ungets(), 2);
    assert!(registry.get_service(A, &reference).is_none());
    assert!(!registry.unget_service(A, &reference));
    assert_eq!(counts.gets(), 2);
}

#[test]
fn test_factory_failure_yields_none() {
    let registry = ServiceRegistry::default();
    let counts = Arc::new(Counts::default());
    let reference = register(
        &registry,
        CountingFactory {
            fail_get: true,
            ..CountingFactory::new(&counts)
        },
    )
    .reference();

    assert!(registry.get_service(A, &reference).is_none());
    assert!(registry.get_using_modules(&reference).is_empty());
    assert!(!registry.unget_service(A, &reference));

    // 失败不会留下缓存
    assert!(registry.get_service(A, &reference).is_none());
    assert_eq!(counts.gets(), 2);
    assert_eq!(counts.ungets(), 0);
}

struct PanickingFactory;

impl ServiceFactory for PanickingFactory {
    fn get_service(
        &self,
        _consumer: ModuleId,
        _registration: &ServiceRegistration,
    ) -> Result<ServiceObject, FactoryError> {
        panic!("factory exploded");
    }
}

#[test]
fn test_factory_panic_is_contained() {
    let registry = ServiceRegistry::default();
    let registration = registry
        .register_service(
            OWNER,
            ["Foo"],
            ServiceSource::factory(PanickingFactory),
            Properties::new(),
        )
        .expect("Failed to register panicking factory");

    assert!(registry.get_service(A, &registration.reference()).is_none());
    registry
        .unregister_service(OWNER, &registration)
        .expect("Registry should stay usable after factory panic");
    assert!(registry.is_empty());
}

#[test]
fn test_unget_failure_still_releases_usage() {
    let registry = ServiceRegistry::default();
    let counts = Arc::new(Counts::default());
    let reference = register(
        &registry,
        CountingFactory {
            fail_unget: true,
            ..CountingFactory::new(&counts)
        },
    )
    .reference();

    registry.get_service(A, &reference).expect("Failed to get service");
    assert!(registry.unget_service(A, &reference));
    assert_eq!(counts.ungets(), 1);
    assert!(registry.get_using_modules(&reference).is_empty());
}

// 在 get_service 中请求自身
struct RecursiveFactory {
    registry: Arc<OnceLock<ServiceRegistry>>,
    inner_result_was_none: Arc<AtomicBool>,
}

impl ServiceFactory for RecursiveFactory {
    fn get_service(
        &self,
        consumer: ModuleId,
        registration: &ServiceRegistration,
    ) -> Result<ServiceObject, FactoryError> {
        if let Some(registry) = self.registry.get() {
            let nested = registry.get_service(consumer, &registration.reference());
            self.inner_result_was_none
                .store(nested.is_none(), Ordering::SeqCst);
        }
        Ok(ServiceObject::new(42u32))
    }
}

#[test]
fn test_recursive_factory_request_does_not_deadlock() {
    let registry = ServiceRegistry::default();
    let slot = Arc::new(OnceLock::new());
    let inner_result_was_none = Arc::new(AtomicBool::new(false));
    let registration = registry
        .register_service(
            OWNER,
            ["Foo"],
            ServiceSource::factory(RecursiveFactory {
                registry: slot.clone(),
                inner_result_was_none: inner_result_was_none.clone(),
            }),
            Properties::new(),
        )
        .expect("Failed to register recursive factory");
    let _ = slot.set(registry.clone());

    let service = registry
        .get_service(A, &registration.reference())
        .expect("Outer request should succeed");
    assert_eq!(service.downcast_ref::<u32>(), Some(&42));
    assert!(inner_result_was_none.load(Ordering::SeqCst));
    assert_eq!(registry.usage_count(A, &registration.reference()), 1);
}

#[test]
fn test_concurrent_first_use_calls_factory_once() {
    let registry = ServiceRegistry::default();
    let counts = Arc::new(Counts::default());
    let reference = register(
        &registry,
        CountingFactory {
            delay: Some(Duration::from_millis(20)),
            ..CountingFactory::new(&counts)
        },
    )
    .reference();

    let barrier = Barrier::new(8);
    let services: Vec<ServiceObject> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    registry
                        .get_service(A, &reference)
                        .expect("Failed to get service concurrently")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("Worker thread panicked"))
            .collect()
    });

    assert_eq!(counts.gets(), 1);
    assert!(services.iter().all(|service| service.same_object(&services[0])));
    assert_eq!(registry.usage_count(A, &reference), 8);

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| assert!(registry.unget_service(A, &reference)));
        }
    });
    assert_eq!(counts.ungets(), 1);
    assert!(registry.get_using_modules(&reference).is_empty());
}

#[test]
fn test_unget_services_releases_all_counts_for_consumer() {
    let registry = ServiceRegistry::default();
    let counts = Arc::new(Counts::default());
    let first = register(&registry, CountingFactory::new(&counts)).reference();
    let second = register(&registry, CountingFactory::new(&counts)).reference();

    for _ in 0..3 {
        registry.get_service(A, &first).expect("Failed to get first");
    }
    registry.get_service(A, &second).expect("Failed to get second");
    registry.get_service(B, &second).expect("Failed to get second for B");
    assert_eq!(registry.get_services_in_use(A), vec![first.clone(), second.clone()]);

    assert_eq!(registry.unget_services(A), 2);
    assert_eq!(counts.ungets(), 2);
    assert!(registry.get_services_in_use(A).is_empty());
    assert_eq!(registry.get_using_modules(&second), vec![B]);
}
