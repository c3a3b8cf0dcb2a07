use std::{
    collections::HashMap,
    fmt::{self, Debug},
    hash::Hash,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::{
    collection::StrategyCollection,
    config::KernelConfig,
    dependency_graph::DependencyGraph,
    disposal::DisposalScope,
    errors::{ConfigureError, LocationEntry},
    export_type::{ExportType, GenericDef},
    extension::{
        ExportStrategyInspector, MissingExportStrategyProvider, SecondaryExportLocator,
        ShapeStrategyProvider, SharedInspector, SharedLocator, SharedProvider, SharedShapeProvider,
        WrapperShapes,
    },
    lifestyle::InstanceSlot,
    request::{LocateRequest, LocateTarget},
    strategy::{Activator, ExportStrategy},
    types::ExportKey,
};

mod locate;
mod manager;
mod registration;

pub use manager::{ChildScopeOptions, ScopeManager};
pub use registration::RegistrationBlock;

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// Unique id of a scope, used to decide who owns a shared collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u64);
impl ScopeId {
    fn next() -> Self {
        ScopeId(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed))
    }
}
impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Registry<K> = ArcSwap<HashMap<K, Arc<StrategyCollection>>>;

/// A node of the scope tree
///
/// Cheap to clone, all clones refer to the same scope. The scope is disposed
/// when [`Scope::dispose`] is called or the last clone is dropped.
#[derive(Clone)]
pub struct Scope(Arc<ScopeInner>);

struct ScopeInner {
    id: ScopeId,
    name: Option<Arc<str>>,
    parent: Option<Scope>,
    /// Detached scopes hold the registrations of named child scopes
    template: bool,
    by_type: Registry<ExportType>,
    by_name: Registry<String>,
    open_generics: Registry<GenericDef>,
    write_lock: Mutex<()>,
    locators: ArcSwap<Vec<SharedLocator>>,
    missing_providers: ArcSwap<Vec<SharedProvider>>,
    inspectors: ArcSwap<Vec<SharedInspector>>,
    shape_providers: ArcSwap<Vec<SharedShapeProvider>>,
    disposal: DisposalScope,
    scoped_slots: Mutex<HashMap<u64, Arc<InstanceSlot>>>,
    config: Arc<KernelConfig>,
    manager: Arc<ScopeManager>,
    disposed: AtomicBool,
}

/// Reference to a scope which does not keep it alive
#[derive(Clone)]
pub struct WeakScope(Weak<ScopeInner>);
impl WeakScope {
    pub fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(Scope)
    }
}

impl Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("parent", &self.0.parent.as_ref().map(Scope::id))
            .field("types", &self.0.by_type.load().len())
            .field("names", &self.0.by_name.load().len())
            .field("open_generics", &self.0.open_generics.load().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::root()
    }
}

impl Scope {
    /// A root scope with the default configuration
    pub fn root() -> Scope {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Scope {
        let root = Scope::create(
            None,
            None,
            false,
            None,
            Arc::new(config),
            Arc::new(ScopeManager::new()),
        );
        root.add_shape_provider(WrapperShapes);
        tracing::debug!("Created root scope {}", root.id());
        root
    }

    fn create(
        parent: Option<Scope>,
        name: Option<&str>,
        template: bool,
        disposal: Option<DisposalScope>,
        config: Arc<KernelConfig>,
        manager: Arc<ScopeManager>,
    ) -> Scope {
        Scope(Arc::new(ScopeInner {
            id: ScopeId::next(),
            name: name.map(Arc::from),
            parent,
            template,
            by_type: Default::default(),
            by_name: Default::default(),
            open_generics: Default::default(),
            write_lock: Mutex::new(()),
            locators: Default::default(),
            missing_providers: Default::default(),
            inspectors: Default::default(),
            shape_providers: Default::default(),
            disposal: disposal.unwrap_or_default(),
            scoped_slots: Mutex::new(HashMap::new()),
            config,
            manager,
            disposed: AtomicBool::new(false),
        }))
    }

    pub(crate) fn new_child(parent: &Scope, name: Option<&str>, disposal: Option<DisposalScope>) -> Scope {
        Scope::create(
            Some(parent.clone()),
            name,
            false,
            disposal,
            parent.0.config.clone(),
            parent.0.manager.clone(),
        )
    }

    /// A scope outside the tree, holding the registrations of a named scope
    pub(crate) fn detached(parent: &Scope, name: &str) -> Scope {
        Scope::create(
            None,
            Some(name),
            true,
            None,
            parent.0.config.clone(),
            parent.0.manager.clone(),
        )
    }

    /// A child sharing the template's registrations until it registers its own
    pub(crate) fn from_template(
        parent: &Scope,
        template: &Scope,
        name: Option<&str>,
        disposal: Option<DisposalScope>,
    ) -> Scope {
        let child = Scope::new_child(parent, name, disposal);
        let _guard = template.0.write_lock.lock();
        child.0.by_type.store(template.0.by_type.load_full());
        child.0.by_name.store(template.0.by_name.load_full());
        child.0.open_generics.store(template.0.open_generics.load_full());
        child.0.locators.store(template.0.locators.load_full());
        child.0.missing_providers.store(template.0.missing_providers.load_full());
        child
    }

    pub fn id(&self) -> ScopeId {
        self.0.id
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub(crate) fn name_arc(&self) -> Option<Arc<str>> {
        self.0.name.clone()
    }

    /// Name and id, for messages
    pub fn display_name(&self) -> String {
        match &self.0.name {
            Some(name) => format!("{name} ({})", self.0.id),
            None => self.0.id.to_string(),
        }
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    pub fn root_scope(&self) -> Scope {
        self.ancestors().last().cloned().unwrap_or_else(|| self.clone())
    }

    /// This scope, then its parent, up to the root
    pub fn ancestors(&self) -> impl Iterator<Item = &Scope> {
        std::iter::successors(Some(self), |scope| scope.parent())
    }

    pub fn config(&self) -> &KernelConfig {
        &self.0.config
    }

    pub fn manager(&self) -> &Arc<ScopeManager> {
        &self.0.manager
    }

    /// Tracks disposables owned by this scope
    pub fn disposal(&self) -> &DisposalScope {
        &self.0.disposal
    }

    /// Holds the registrations of a named scope, outside the tree
    pub(crate) fn is_template(&self) -> bool {
        self.0.template
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::Acquire)
    }

    pub fn downgrade(&self) -> WeakScope {
        WeakScope(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn scoped_slot(&self, lifestyle_id: u64) -> Arc<InstanceSlot> {
        self.0
            .scoped_slots
            .lock()
            .entry(lifestyle_id)
            .or_default()
            .clone()
    }

    pub(crate) fn location(&self, request: &LocateRequest, member: Option<&'static str>) -> LocationEntry {
        LocationEntry {
            scope_id: self.0.id,
            scope_name: self.0.name.clone(),
            request: request.target.to_string(),
            member,
            keyed: request.key.is_some(),
            filtered: request.filter.is_some(),
        }
    }

    // ###############################################
    // Registry access

    pub(crate) fn collection_for(&self, request: &LocateRequest) -> Option<Arc<StrategyCollection>> {
        match &request.target {
            LocateTarget::Type(export_type) => self.0.by_type.load().get(export_type).cloned(),
            LocateTarget::Name(name) => self.0.by_name.load().get(name).cloned(),
        }
    }

    /// The collection for `export_type`, with `create` it is this scope's own
    /// and may be written to
    pub fn strategy_collection(
        &self,
        export_type: &ExportType,
        create: bool,
    ) -> Option<Arc<StrategyCollection>> {
        if !create {
            return self.0.by_type.load().get(export_type).cloned();
        }

        let _guard = self.0.write_lock.lock();
        let mut by_type = HashMap::clone(&self.0.by_type.load());
        let collection = own_collection(&mut by_type, export_type.clone(), self.0.id);
        self.0.by_type.store(Arc::new(by_type));
        Some(collection)
    }

    pub fn strategy_collection_by_name(&self, name: &str) -> Option<Arc<StrategyCollection>> {
        self.0
            .by_name
            .load()
            .get(&name.trim().to_lowercase())
            .cloned()
    }

    pub fn open_generic_collection(&self, definition: &GenericDef) -> Option<Arc<StrategyCollection>> {
        self.0.open_generics.load().get(definition).cloned()
    }

    /// The producer a plain request for `export_type` would use in this scope
    pub fn strategy(&self, export_type: &ExportType, key: Option<&ExportKey>) -> Option<Arc<ExportStrategy>> {
        let collection = self.strategy_collection(export_type, false)?;
        match key {
            Some(key) => collection.keyed_strategies().get(key).cloned(),
            None => collection.strategies().first().cloned(),
        }
    }

    /// Every producer registered in this scope
    pub fn strategies(&self) -> Vec<Arc<ExportStrategy>> {
        let mut all: Vec<Arc<ExportStrategy>> = Vec::new();
        let mut push = |strategy: &Arc<ExportStrategy>| {
            if !all.iter().any(|existing| existing.id() == strategy.id()) {
                all.push(strategy.clone());
            }
        };
        for collection in self.0.by_type.load().values() {
            collection.all_strategies().iter().for_each(&mut push);
        }
        for collection in self.0.by_name.load().values() {
            collection.all_strategies().iter().for_each(&mut push);
        }
        for collection in self.0.open_generics.load().values() {
            collection.all_strategies().iter().for_each(&mut push);
        }
        all
    }

    // ###############################################
    // Extensions

    pub fn add_secondary_locator(&self, locator: impl SecondaryExportLocator + 'static) {
        push_shared(&self.0.write_lock, &self.0.locators, Arc::new(locator));
    }

    pub fn add_missing_export_provider(&self, provider: impl MissingExportStrategyProvider + 'static) {
        push_shared(&self.0.write_lock, &self.0.missing_providers, Arc::new(provider));
    }

    /// Inspects producers registered in this scope and its descendants
    pub fn add_inspector(&self, inspector: impl ExportStrategyInspector + 'static) {
        push_shared(&self.0.write_lock, &self.0.inspectors, Arc::new(inspector));
    }

    pub fn add_shape_provider(&self, provider: impl ShapeStrategyProvider + 'static) {
        push_shared(&self.0.write_lock, &self.0.shape_providers, Arc::new(provider));
    }

    pub(crate) fn secondary_locators(&self) -> Arc<Vec<SharedLocator>> {
        self.0.locators.load_full()
    }

    pub(crate) fn missing_export_providers(&self) -> Arc<Vec<SharedProvider>> {
        self.0.missing_providers.load_full()
    }

    pub(crate) fn shape_providers(&self) -> Arc<Vec<SharedShapeProvider>> {
        self.0.shape_providers.load_full()
    }

    // ###############################################
    // Registration

    /// Registers everything added to the block, all or nothing
    pub fn configure(
        &self,
        registration: impl FnOnce(&mut RegistrationBlock),
    ) -> Result<Vec<Arc<ExportStrategy>>, ConfigureError> {
        let mut block = RegistrationBlock::new();
        registration(&mut block);
        self.register(block.finish()?)
    }

    pub fn add_strategy(&self, strategy: ExportStrategy) -> Result<Arc<ExportStrategy>, ConfigureError> {
        let mut registered = self.register(vec![strategy])?;
        registered
            .pop()
            .ok_or_else(|| ConfigureError::Aggregate(Vec::new()))
    }

    pub(crate) fn register(
        &self,
        strategies: Vec<ExportStrategy>,
    ) -> Result<Vec<Arc<ExportStrategy>>, ConfigureError> {
        let prepared = self.prepare(strategies)?;
        {
            let _guard = self.0.write_lock.lock();
            self.index_locked(&prepared);
        }
        self.adopt_instances(&prepared);
        Ok(prepared)
    }

    /// Registers `strategy` unless `export_type` already has producers here
    pub(crate) fn register_if_absent(
        &self,
        strategy: ExportStrategy,
        export_type: &ExportType,
    ) -> Result<bool, ConfigureError> {
        let prepared = self.prepare(vec![strategy])?;
        {
            let _guard = self.0.write_lock.lock();
            let present = self
                .0
                .by_type
                .load()
                .get(export_type)
                .is_some_and(|collection| !collection.is_empty());
            if present {
                return Ok(false);
            }
            self.index_locked(&prepared);
        }
        self.adopt_instances(&prepared);
        Ok(true)
    }

    /// Registers a producer closed from an open generic, once per open producer
    /// and requested type
    pub(crate) fn register_closed(
        &self,
        strategy: ExportStrategy,
        requested: &ExportType,
    ) -> Result<bool, ConfigureError> {
        let Some(creator) = strategy.creating_strategy() else {
            return self.register_if_absent(strategy, requested);
        };

        let prepared = self.prepare(vec![strategy])?;
        let _guard = self.0.write_lock.lock();
        let closed = self
            .0
            .by_type
            .load()
            .get(requested)
            .is_some_and(|collection| collection.contains_created_by(creator));
        if closed {
            return Ok(false);
        }
        self.index_locked(&prepared);
        Ok(true)
    }

    /// Inspects and seals producers, nothing is registered if any fails
    fn prepare(&self, strategies: Vec<ExportStrategy>) -> Result<Vec<Arc<ExportStrategy>>, ConfigureError> {
        if self.is_disposed() {
            return Err(ConfigureError::ScopeDisposed(self.display_name()));
        }

        let inspectors = self.inspector_chain();
        let mut prepared = Vec::with_capacity(strategies.len());
        let mut errors = Vec::new();

        'strategies: for mut strategy in strategies {
            for inspector in &inspectors {
                if let Err(error) = inspector.inspect(&mut strategy) {
                    errors.push(ConfigureError::Inspector {
                        activation: strategy.activation_type().to_string(),
                        error: Arc::new(error),
                    });
                    continue 'strategies;
                }
            }

            match strategy.seal(self) {
                Ok(()) => prepared.push(Arc::new(strategy)),
                Err(error) => errors.push(error),
            }
        }

        match errors.len() {
            0 => Ok(prepared),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigureError::Aggregate(errors)),
        }
    }

    /// Global inspectors, then the chain from the root down to this scope
    fn inspector_chain(&self) -> Vec<SharedInspector> {
        let mut inspectors: Vec<SharedInspector> = self.0.manager.inspectors().iter().cloned().collect();
        let chain: Vec<&Scope> = self.ancestors().collect();
        for scope in chain.into_iter().rev() {
            inspectors.extend(scope.0.inspectors.load().iter().cloned());
        }
        inspectors
    }

    fn index_locked(&self, strategies: &[Arc<ExportStrategy>]) {
        let owner = self.0.id;
        let mut by_type = HashMap::clone(&self.0.by_type.load());
        let mut by_name = HashMap::clone(&self.0.by_name.load());
        let mut open_generics = HashMap::clone(&self.0.open_generics.load());

        for strategy in strategies {
            let key = strategy.key().cloned();
            if strategy.is_open_generic() {
                for definition in strategy.generic_exports() {
                    own_collection(&mut open_generics, *definition, owner)
                        .add_export(strategy.clone(), key.clone());
                }
                continue;
            }

            for export_type in strategy.export_types() {
                own_collection(&mut by_type, export_type.clone(), owner)
                    .add_export(strategy.clone(), key.clone());
            }
            for name in strategy.export_names() {
                own_collection(&mut by_name, name.clone(), owner)
                    .add_export(strategy.clone(), key.clone());
            }
            tracing::debug!(
                "Registered {} in scope {} [{}]",
                strategy.activation_type(),
                self.display_name(),
                strategy.lifestyle_name()
            );
        }

        self.0.by_type.store(Arc::new(by_type));
        self.0.by_name.store(Arc::new(by_name));
        self.0.open_generics.store(Arc::new(open_generics));
    }

    /// Supplied instances handed over to the kernel are disposed with this scope
    fn adopt_instances(&self, strategies: &[Arc<ExportStrategy>]) {
        for strategy in strategies {
            if let Activator::Instance(instance) = strategy.activator() {
                strategy.track_disposable(instance, &self.0.disposal);
            }
        }
    }

    /// Removes a producer, and every producer closed from it
    pub fn remove_strategy(&self, strategy: &ExportStrategy) -> bool {
        let _guard = self.0.write_lock.lock();
        let owner = self.0.id;
        let id = strategy.id();
        let mut removed = false;

        let mut by_type = HashMap::clone(&self.0.by_type.load());
        let mut by_name = HashMap::clone(&self.0.by_name.load());
        let mut open_generics = HashMap::clone(&self.0.open_generics.load());

        for export_type in strategy.export_types() {
            if by_type.contains_key(export_type) {
                removed |= own_collection(&mut by_type, export_type.clone(), owner).remove_export(strategy);
            }
        }
        for name in strategy.export_names() {
            if by_name.contains_key(name) {
                removed |= own_collection(&mut by_name, name.clone(), owner).remove_export(strategy);
            }
        }
        for definition in strategy.generic_exports() {
            if open_generics.contains_key(definition) {
                removed |= own_collection(&mut open_generics, *definition, owner).remove_export(strategy);
            }
        }

        if strategy.is_open_generic() {
            let stale: Vec<ExportType> = by_type
                .iter()
                .filter(|(_, collection)| collection.contains_created_by(id))
                .map(|(export_type, _)| export_type.clone())
                .collect();
            for export_type in stale {
                let closed = own_collection(&mut by_type, export_type, owner)
                    .remove_where(|existing| existing.creating_strategy() == Some(id));
                removed |= !closed.is_empty();
            }
        }

        self.0.by_type.store(Arc::new(by_type));
        self.0.by_name.store(Arc::new(by_name));
        self.0.open_generics.store(Arc::new(open_generics));
        removed
    }

    // ###############################################
    // Children

    /// Creates a child scope
    ///
    /// Children of a configured named scope start with its registrations.
    pub fn create_child_scope(&self, options: ChildScopeOptions) -> Result<Scope, ConfigureError> {
        if self.is_disposed() {
            return Err(ConfigureError::ScopeDisposed(self.display_name()));
        }
        self.0.manager.create_child(self, options)
    }

    /// An unnamed child without registrations
    pub fn child(&self) -> Result<Scope, ConfigureError> {
        self.create_child_scope(ChildScopeOptions::default())
    }

    /// Graph of the producers visible from this scope
    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_scope(self)
    }

    /// Every producer visible from this scope with its dependencies, one per line
    pub fn describe(&self) -> String {
        self.dependency_graph().to_string()
    }

    // ###############################################
    // Disposal

    /// Disposes everything this scope owns - idempotent
    ///
    /// Values produced by ancestors or shared templates are left alone.
    pub fn dispose(&self) {
        self.0.dispose();
    }
}

impl ScopeInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("Disposing scope {}", self.id);

        self.disposal.dispose();

        let registries = [
            self.by_type.load().values().cloned().collect::<Vec<_>>(),
            self.by_name.load().values().cloned().collect(),
            self.open_generics.load().values().cloned().collect(),
        ];
        for collection in registries.iter().flatten() {
            if collection.owner() != self.id {
                continue;
            }
            for strategy in collection.all_strategies() {
                if strategy.owner_id() == Some(self.id) {
                    strategy.dispose();
                }
            }
        }

        self.scoped_slots.lock().clear();

        if self.parent.is_none() && !self.template {
            self.manager.dispose_templates();
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Returns the collection for `key` owned by `owner`, copying a shared one first
fn own_collection<K: Hash + Eq>(
    map: &mut HashMap<K, Arc<StrategyCollection>>,
    key: K,
    owner: crate::scope::ScopeId,
) -> Arc<StrategyCollection> {
    match map.get(&key) {
        Some(existing) if existing.owner() == owner => existing.clone(),
        Some(existing) => {
            let copy = Arc::new(existing.clone_for(owner));
            map.insert(key, copy.clone());
            copy
        }
        None => {
            let created = Arc::new(StrategyCollection::new(owner));
            map.insert(key, created.clone());
            created
        }
    }
}

fn push_shared<T: ?Sized>(lock: &Mutex<()>, list: &ArcSwap<Vec<Arc<T>>>, item: Arc<T>) {
    let _guard = lock.lock();
    let mut updated = Vec::clone(&list.load());
    updated.push(item);
    list.store(Arc::new(updated));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyBuilder;

    #[test]
    fn ids_render_with_hash() {
        assert_eq!(ScopeId(4).to_string(), "#4");
    }

    #[test]
    fn ancestors_walk_to_root() {
        let root = Scope::root();
        let child = root.child().unwrap();
        let grandchild = child
            .create_child_scope(ChildScopeOptions::new().name("leaf"))
            .unwrap();

        let ids: Vec<ScopeId> = grandchild.ancestors().map(Scope::id).collect();
        assert_eq!(ids, vec![grandchild.id(), child.id(), root.id()]);
        assert!(grandchild.root_scope().ptr_eq(&root));
        assert_eq!(grandchild.name(), Some("leaf"));
    }

    #[test]
    fn failed_registration_registers_nothing() {
        let root = Scope::root();
        let result = root.configure(|registration| {
            registration
                .instance(1_u32)
                .add(StrategyBuilder::instance(2_u64).export_name(" "));
        });
        assert!(result.is_err());
        assert!(root.strategy(&ExportType::of::<u32>(), None).is_none());
    }

    #[test]
    fn child_writes_copy_shared_collections() {
        let root = Scope::root();
        root.manager()
            .configure_named_scope("request", |registration| {
                registration.instance(1_u32);
            });

        let first = root
            .create_child_scope(ChildScopeOptions::new().name("request"))
            .unwrap();
        let second = root
            .create_child_scope(ChildScopeOptions::new().name("request"))
            .unwrap();

        let shared = first.strategy_collection(&ExportType::of::<u32>(), false).unwrap();
        assert!(Arc::ptr_eq(
            &shared,
            &second.strategy_collection(&ExportType::of::<u32>(), false).unwrap()
        ));

        first.add_strategy(StrategyBuilder::instance(2_u32).build().unwrap()).unwrap();
        let own = first.strategy_collection(&ExportType::of::<u32>(), false).unwrap();
        assert!(!Arc::ptr_eq(&shared, &own));
        assert_eq!(own.len(), 2);
        assert_eq!(shared.len(), 1);
        assert_eq!(second.locate::<u32>().unwrap().map(|v| *v), Some(1));
        assert_eq!(first.locate::<u32>().unwrap().map(|v| *v), Some(2));
    }

    #[test]
    fn disposed_scopes_reject_registrations() {
        let root = Scope::root();
        let child = root.child().unwrap();
        child.dispose();
        child.dispose();
        assert!(matches!(
            child.add_strategy(StrategyBuilder::instance(1_u8).build().unwrap()),
            Err(ConfigureError::ScopeDisposed(_))
        ));
        assert!(matches!(root.child(), Ok(_)));
    }
}
