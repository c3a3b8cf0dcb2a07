use std::{
    any::type_name,
    marker::PhantomData,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use rstest::{fixture, rstest};
use wrapp_di::{
    ChildScopeOptions, DependencyInfo, DiHandle, Disposable, DynError, ExportStrategy, ExportType,
    Generic, GenericDef, Instance, KernelBuilder, Lazy, LocateErrorKind, LocateOptions, Owned,
    Scope, StrategyBuilder,
};

trait Service: Send + Sync {
    fn name(&self) -> &'static str;
}

struct ServiceA;
impl Service for ServiceA {
    fn name(&self) -> &'static str {
        "a"
    }
}

struct ServiceB;
impl Service for ServiceB {
    fn name(&self) -> &'static str {
        "b"
    }
}

struct Connection {
    disposed: Arc<AtomicUsize>,
}
impl Disposable for Connection {
    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

fn connection_producer(disposed: &Arc<AtomicUsize>) -> StrategyBuilder {
    let disposed = disposed.clone();
    StrategyBuilder::delegate_instance(ExportType::of::<Connection>(), move |_| {
        Ok(Instance::disposable(Connection {
            disposed: disposed.clone(),
        }))
    })
    .produces_disposable()
}

#[fixture]
fn disposed() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[test]
fn singleton_is_constructed_once_under_contention() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let counter = constructed.clone();
    let root = KernelBuilder::new()
        .add(
            StrategyBuilder::delegate(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                Ok(String::from("shared"))
            })
            .singleton(),
        )
        .build()
        .unwrap();

    let located: Vec<Arc<String>> = thread::scope(|threads| {
        let handles: Vec<_> = (0..8)
            .map(|_| threads.spawn(|| root.locate::<String>().unwrap().unwrap()))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert!(located.iter().all(|value| Arc::ptr_eq(value, &located[0])));
}

#[test]
fn child_registrations_are_isolated() {
    let root = KernelBuilder::new().add_instance(1_u32).build().unwrap();
    let child = root
        .create_child_scope(ChildScopeOptions::new().configure(|registration| {
            registration.instance(2_u32).instance(String::from("child only"));
        }))
        .unwrap();
    let sibling = root.child().unwrap();

    assert_eq!(child.locate::<u32>().unwrap().map(|v| *v), Some(2));
    assert!(child.locate::<String>().unwrap().is_some());
    assert_eq!(sibling.locate::<u32>().unwrap().map(|v| *v), Some(1));
    assert!(sibling.locate::<String>().unwrap().is_none());
    assert!(root.locate::<String>().unwrap().is_none());

    let all: Vec<u32> = child.locate_all::<u32>().unwrap().iter().map(|v| **v).collect();
    assert_eq!(all, vec![2, 1]);
}

#[rstest]
#[case(5, 10, 20)]
#[case(10, 5, 10)]
#[case(7, 7, 20)]
fn priority_decides_between_producers(#[case] first: i32, #[case] second: i32, #[case] expected: u32) {
    let root = KernelBuilder::new()
        .add(StrategyBuilder::instance(10_u32).priority(first))
        .add(StrategyBuilder::instance(20_u32).priority(second))
        .build()
        .unwrap();

    assert_eq!(*root.locate::<u32>().unwrap().unwrap(), expected);
    let all = root.locate_all::<u32>().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(*all[0], expected);
}

#[test]
fn keyed_producers_need_their_key() {
    let root = KernelBuilder::new()
        .add(StrategyBuilder::instance(String::from("a")).keyed("A"))
        .build()
        .unwrap();

    assert!(root.locate::<String>().unwrap().is_none());
    assert!(root
        .locate_with::<String>(LocateOptions::new().key("B"))
        .unwrap()
        .is_none());
    let keyed = root
        .locate_with::<String>(LocateOptions::new().key("A"))
        .unwrap()
        .unwrap();
    assert_eq!(keyed.as_str(), "a");
}

#[rstest]
fn scope_disposes_its_transients_once(disposed: Arc<AtomicUsize>) {
    let root = KernelBuilder::new()
        .add(connection_producer(&disposed))
        .build()
        .unwrap();

    let child = root.child().unwrap();
    child.locate::<Connection>().unwrap().unwrap();
    child.locate::<Connection>().unwrap().unwrap();
    assert_eq!(disposed.load(Ordering::SeqCst), 0);

    child.dispose();
    child.dispose();
    assert_eq!(disposed.load(Ordering::SeqCst), 2);
    assert!(child.locate::<Connection>().is_err());
}

#[rstest]
fn ancestor_singletons_outlive_children(disposed: Arc<AtomicUsize>) {
    let root = KernelBuilder::new()
        .add(connection_producer(&disposed).singleton())
        .build()
        .unwrap();

    let child = root.child().unwrap();
    let from_child = child.locate::<Connection>().unwrap().unwrap();
    child.dispose();
    assert_eq!(disposed.load(Ordering::SeqCst), 0);

    let from_root = root.locate::<Connection>().unwrap().unwrap();
    assert!(Arc::ptr_eq(&from_child, &from_root));

    root.dispose();
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

struct Holder {
    value: Option<Arc<u32>>,
}

#[test]
fn root_singletons_ignore_child_registrations() {
    let root = KernelBuilder::new()
        .add(
            StrategyBuilder::delegate(|di| {
                let value = di.resolve::<Option<Arc<u32>>>()?;
                Ok(Holder { value })
            })
            .singleton(),
        )
        .build()
        .unwrap();
    let child = root
        .create_child_scope(ChildScopeOptions::new().configure(|registration| {
            registration.instance(99_u32);
        }))
        .unwrap();

    let from_child = child.locate::<Holder>().unwrap().unwrap();
    assert!(from_child.value.is_none());
    assert!(root.locate::<u32>().unwrap().is_none());

    let from_root = root.locate::<Holder>().unwrap().unwrap();
    assert!(Arc::ptr_eq(&from_child, &from_root));
}

struct Pool {
    connection: Arc<Connection>,
}

#[rstest]
fn root_singleton_dependencies_survive_child_disposal(disposed: Arc<AtomicUsize>) {
    let root = KernelBuilder::new()
        .add(connection_producer(&disposed))
        .add(
            StrategyBuilder::delegate(|di| {
                let connection = di.resolve::<Arc<Connection>>()?;
                Ok(Pool { connection })
            })
            .singleton(),
        )
        .build()
        .unwrap();

    let child = root.child().unwrap();
    let pool = child.locate::<Pool>().unwrap().unwrap();
    assert!(root.locate::<Pool>().unwrap().is_some_and(|again| Arc::ptr_eq(&again, &pool)));
    child.dispose();
    assert_eq!(disposed.load(Ordering::SeqCst), 0);

    root.dispose();
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[rstest]
fn externally_owned_values_are_never_disposed(disposed: Arc<AtomicUsize>) {
    let root = KernelBuilder::new()
        .add(connection_producer(&disposed).externally_owned(true))
        .build()
        .unwrap();

    let child = root.child().unwrap();
    child.locate::<Connection>().unwrap().unwrap();
    child.dispose();
    root.dispose();
    assert_eq!(disposed.load(Ordering::SeqCst), 0);
}

#[rstest]
fn owned_values_are_disposed_by_their_owner(disposed: Arc<AtomicUsize>) {
    let root = KernelBuilder::new()
        .add(connection_producer(&disposed))
        .build()
        .unwrap();

    let owned = root.resolve::<Owned<Connection>>().unwrap().unwrap();
    let all = root.locate_all_owned::<Connection>().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(owned.disposal().len(), 1);

    drop(owned);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    drop(all);
    assert_eq!(disposed.load(Ordering::SeqCst), 2);

    root.dispose();
    assert_eq!(disposed.load(Ordering::SeqCst), 2);
}

#[test]
fn default_and_keyed_services() {
    let root = KernelBuilder::new()
        .add(
            StrategyBuilder::delegate(|_| Ok(ServiceA))
                .export_as(|service: Arc<ServiceA>| service as Arc<dyn Service>)
                .singleton(),
        )
        .add(
            StrategyBuilder::delegate(|_| Ok(ServiceB))
                .export_as(|service: Arc<ServiceB>| service as Arc<dyn Service>)
                .priority(10)
                .keyed("alt"),
        )
        .build()
        .unwrap();

    let first = root.locate::<dyn Service>().unwrap().unwrap();
    let second = root.locate::<dyn Service>().unwrap().unwrap();
    assert_eq!(first.name(), "a");
    assert!(Arc::ptr_eq(&first, &second));

    let alt = LocateOptions::new().key("alt");
    let alt_first = root.locate_with::<dyn Service>(alt.clone()).unwrap().unwrap();
    let alt_second = root.locate_with::<dyn Service>(alt).unwrap().unwrap();
    assert_eq!(alt_first.name(), "b");
    assert!(!Arc::ptr_eq(&alt_first, &alt_second));
    assert!(!Arc::ptr_eq(&first, &alt_first));
}

const REPOSITORY: GenericDef = GenericDef::new("Repository", 1);

struct Customer;
struct Order;

struct Repository<T> {
    entity: &'static str,
    _entity: PhantomData<fn() -> T>,
}
impl<T: Send + Sync + 'static> Generic for Repository<T> {
    const DEFINITION: GenericDef = REPOSITORY;

    fn arguments() -> Vec<ExportType> {
        vec![ExportType::of::<T>()]
    }

    fn construct(_: &mut DiHandle<'_>) -> Result<Self, DynError> {
        Ok(Repository {
            entity: type_name::<T>(),
            _entity: PhantomData,
        })
    }
}

#[test]
fn open_generic_repositories_close_once_per_entity() {
    let closings = Arc::new(AtomicUsize::new(0));
    let counter = closings.clone();
    let root = KernelBuilder::new()
        .add_inspector(move |strategy: &mut ExportStrategy| -> Result<(), DynError> {
            if strategy.creating_strategy().is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .add(StrategyBuilder::open_generic(REPOSITORY).singleton())
        .build()
        .unwrap();

    let customers = root.locate_generic::<Repository<Customer>>().unwrap().unwrap();
    let orders = root.locate_generic::<Repository<Order>>().unwrap().unwrap();
    assert!(customers.entity.ends_with("Customer"));
    assert!(orders.entity.ends_with("Order"));
    assert_eq!(closings.load(Ordering::SeqCst), 2);

    let again = root.locate_generic::<Repository<Customer>>().unwrap().unwrap();
    assert!(Arc::ptr_eq(&customers, &again));
    assert_eq!(closings.load(Ordering::SeqCst), 2);

    let closed = root
        .strategy_collection(&ExportType::generic::<Repository<Customer>>(), false)
        .unwrap();
    assert_eq!(closed.len(), 1);
}

struct Parent {
    child: Arc<Child>,
}
struct Child {
    parent: Lazy<Parent>,
}

fn family(root: &Scope) {
    root.configure(|registration| {
        registration
            .add(
                StrategyBuilder::delegate(|di| {
                    let child = di.dependencies().get::<Child>("child")?;
                    Ok(Parent { child })
                })
                .depends_on(DependencyInfo::of::<Child>().member("child"))
                .singleton(),
            )
            .add(
                StrategyBuilder::delegate(|di| {
                    let parent = di.dependencies().lazy::<Parent>("parent")?;
                    Ok(Child { parent })
                })
                .depends_on(DependencyInfo::of::<Parent>().member("parent").lazy())
                .singleton(),
            );
    })
    .unwrap();
}

#[test]
fn lazy_dependencies_break_cycles() {
    let root = Scope::root();
    family(&root);
    assert!(root.dependency_graph().check().is_ok());

    let parent = root.locate::<Parent>().unwrap().unwrap();
    assert!(!parent.child.parent.is_resolved());
    assert!(Arc::ptr_eq(parent.child.parent.get(), &parent));
}

struct Narcissus;

#[rstest]
#[case::singleton(StrategyBuilder::singleton)]
#[case::weak_singleton(StrategyBuilder::weak_singleton)]
#[case::singleton_per_scope(StrategyBuilder::singleton_per_scope)]
fn forcing_own_lazy_during_construction_fails(#[case] lifestyle: fn(StrategyBuilder) -> StrategyBuilder) {
    let root = KernelBuilder::new()
        .add(lifestyle(StrategyBuilder::delegate(|di| {
            let itself = di.resolve::<Lazy<Narcissus>>()?;
            itself.try_get().map_err(|error| error.clone())?;
            Ok(Narcissus)
        })))
        .build()
        .unwrap();

    for _ in 0..2 {
        let error = match root.locate::<Narcissus>() {
            Err(error) => error,
            Ok(_) => panic!("a value forcing itself must not resolve"),
        };
        assert!(matches!(error.kind, LocateErrorKind::CircularDependency { .. }));
    }
}

struct Chicken;
struct Egg;

#[test]
fn circular_dependencies_fail_with_their_path() {
    let root = KernelBuilder::new()
        .add_delegate(|di: &mut DiHandle<'_>| {
            di.resolve::<Arc<Egg>>()?;
            Ok(Chicken)
        })
        .add_delegate(|di: &mut DiHandle<'_>| {
            di.resolve::<Arc<Chicken>>()?;
            Ok(Egg)
        })
        .build()
        .unwrap();

    let error = match root.locate::<Chicken>() {
        Err(error) => error,
        Ok(_) => panic!("a circular dependency must not resolve"),
    };
    assert!(matches!(error.kind, LocateErrorKind::CircularDependency { .. }));
    assert!(!error.locations.0.is_empty());
}

#[test]
fn failures_are_logged_when_not_throwing() {
    let root = KernelBuilder::new()
        .throw_on_failure(false)
        .add_delegate(|_| -> Result<u8, DynError> { Err("broken".into()) })
        .build()
        .unwrap();

    assert!(root.locate::<u8>().unwrap().is_none());
    assert!(root.resolve::<Arc<u8>>().unwrap().is_none());
    assert!(root.locate_all::<u8>().unwrap().is_empty());
    assert!(root.locate_required::<u16>().is_err());
}

#[test]
fn named_scopes_share_their_registrations() {
    let root = KernelBuilder::new()
        .named_scope("request", |registration| {
            registration.add(
                StrategyBuilder::delegate(|_| Ok(String::from("request data"))).singleton_per_scope(),
            );
        })
        .build()
        .unwrap();

    let first = root.create_child_scope(ChildScopeOptions::new().name("request")).unwrap();
    let second = root.create_child_scope(ChildScopeOptions::new().name("request")).unwrap();

    let a = first.locate::<String>().unwrap().unwrap();
    let a_again = first.locate::<String>().unwrap().unwrap();
    let b = second.locate::<String>().unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &a_again));
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(root.locate::<String>().unwrap().is_none());
}
