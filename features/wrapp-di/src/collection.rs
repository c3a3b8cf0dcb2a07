use std::{collections::HashMap, fmt::Debug, sync::Arc};

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;

use crate::{
    context::InjectionContext,
    disposal::DisposalScope,
    errors::LocateError,
    metadata::Metadata,
    request::LocateRequest,
    resolver::lazy::LazyExport,
    scope::{Scope, ScopeId},
    strategy::{ExportStrategy, StrategyId},
    types::{ExportKey, Instance},
};

/// A located value and the producer it came from
#[derive(Debug, Clone)]
pub struct Located {
    pub instance: Instance,
    /// `None` for values that did not come from a producer, e.g. ambient exports
    pub strategy: Option<Arc<ExportStrategy>>,
}

impl Located {
    pub(crate) fn new(instance: Instance, strategy: Option<Arc<ExportStrategy>>) -> Self {
        Located { instance, strategy }
    }

    pub fn metadata(&self) -> Metadata {
        self.strategy
            .as_ref()
            .map(|strategy| strategy.metadata().clone())
            .unwrap_or_default()
    }
}

/// All producers of one contract within one scope
///
/// Reads never lock, writers serialize on a lock and publish fresh snapshots.
pub struct StrategyCollection {
    owner: ScopeId,
    /// Ordered by priority, later registrations first on ties
    unkeyed: ArcSwap<Vec<Arc<ExportStrategy>>>,
    keyed: ArcSwap<HashMap<ExportKey, Arc<ExportStrategy>>>,
    /// Head of `unkeyed` when it has no conditions
    primary: ArcSwapOption<ExportStrategy>,
    write_lock: Mutex<()>,
}

impl Debug for StrategyCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyCollection")
            .field("owner", &self.owner)
            .field("unkeyed", &self.unkeyed.load().len())
            .field("keyed", &self.keyed.load().len())
            .finish()
    }
}

impl StrategyCollection {
    pub fn new(owner: ScopeId) -> Self {
        StrategyCollection {
            owner,
            unkeyed: ArcSwap::from_pointee(Vec::new()),
            keyed: ArcSwap::from_pointee(HashMap::new()),
            primary: ArcSwapOption::empty(),
            write_lock: Mutex::new(()),
        }
    }

    /// Shallow copy for another scope - producers are shared, the lists are not
    pub fn clone_for(&self, owner: ScopeId) -> Self {
        let _guard = self.write_lock.lock();
        StrategyCollection {
            owner,
            unkeyed: ArcSwap::new(self.unkeyed.load_full()),
            keyed: ArcSwap::new(self.keyed.load_full()),
            primary: ArcSwapOption::new(self.primary.load_full()),
            write_lock: Mutex::new(()),
        }
    }

    /// The scope this collection belongs to, others must copy before writing
    pub fn owner(&self) -> ScopeId {
        self.owner
    }

    pub fn strategies(&self) -> Arc<Vec<Arc<ExportStrategy>>> {
        self.unkeyed.load_full()
    }

    pub fn keyed_strategies(&self) -> Arc<HashMap<ExportKey, Arc<ExportStrategy>>> {
        self.keyed.load_full()
    }

    pub fn primary(&self) -> Option<Arc<ExportStrategy>> {
        self.primary.load_full()
    }

    pub fn len(&self) -> usize {
        self.unkeyed.load().len() + self.keyed.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every producer, unkeyed first
    pub fn all_strategies(&self) -> Vec<Arc<ExportStrategy>> {
        let mut all: Vec<_> = self.unkeyed.load().iter().cloned().collect();
        all.extend(self.keyed.load().values().cloned());
        all
    }

    pub fn add_export(&self, strategy: Arc<ExportStrategy>, key: Option<ExportKey>) {
        let _guard = self.write_lock.lock();
        self.insert_locked(strategy, key);
    }

    fn insert_locked(&self, strategy: Arc<ExportStrategy>, key: Option<ExportKey>) {
        match key {
            Some(key) => {
                let mut keyed = HashMap::clone(&self.keyed.load());
                keyed.insert(key, strategy);
                self.keyed.store(Arc::new(keyed));
            }
            None => {
                let mut unkeyed = Vec::clone(&self.unkeyed.load());
                unkeyed.push(strategy);
                unkeyed.sort_by(|a, b| {
                    b.priority()
                        .cmp(&a.priority())
                        .then_with(|| b.id().cmp(&a.id()))
                });
                self.publish_unkeyed(unkeyed);
            }
        }
    }

    fn publish_unkeyed(&self, unkeyed: Vec<Arc<ExportStrategy>>) {
        let primary = unkeyed
            .first()
            .filter(|head| !head.has_conditions())
            .cloned();
        self.unkeyed.store(Arc::new(unkeyed));
        self.primary.store(primary);
    }

    pub fn remove_export(&self, strategy: &ExportStrategy) -> bool {
        let id = strategy.id();
        !self.remove_where(|existing| existing.id() == id).is_empty()
    }

    /// Removes every producer matching `predicate`, returning them
    pub fn remove_where(
        &self,
        predicate: impl Fn(&ExportStrategy) -> bool,
    ) -> Vec<Arc<ExportStrategy>> {
        let _guard = self.write_lock.lock();
        let mut removed = Vec::new();

        let current = self.unkeyed.load();
        if current.iter().any(|existing| predicate(existing)) {
            let mut unkeyed = Vec::with_capacity(current.len());
            for existing in current.iter() {
                if predicate(existing) {
                    removed.push(existing.clone());
                } else {
                    unkeyed.push(existing.clone());
                }
            }
            self.publish_unkeyed(unkeyed);
        }

        let current = self.keyed.load();
        if current.values().any(|existing| predicate(existing)) {
            let mut keyed = HashMap::with_capacity(current.len());
            for (key, existing) in current.iter() {
                if predicate(existing) {
                    removed.push(existing.clone());
                } else {
                    keyed.insert(key.clone(), existing.clone());
                }
            }
            self.keyed.store(Arc::new(keyed));
        }

        removed
    }

    pub fn contains_created_by(&self, creator: StrategyId) -> bool {
        self.all_strategies()
            .iter()
            .any(|strategy| strategy.creating_strategy() == Some(creator))
    }

    fn allows(strategy: &ExportStrategy, scope: &Scope, context: &InjectionContext, request: &LocateRequest) -> bool {
        if !strategy.meets_condition(scope, context) {
            return false;
        }
        match &request.filter {
            Some(filter) if strategy.allows_filtering() => filter(context, strategy),
            _ => true,
        }
    }

    /// The producer which would serve `request`
    pub fn best_match(
        &self,
        scope: &Scope,
        context: &InjectionContext,
        request: &LocateRequest,
    ) -> Option<Arc<ExportStrategy>> {
        if let Some(selector) = &request.key {
            let keyed = self.keyed.load();
            return selector
                .keys()
                .iter()
                .filter_map(|key| keyed.get(key))
                .find(|strategy| Self::allows(strategy, scope, context, request))
                .cloned();
        }

        if request.filter.is_none() {
            if let Some(primary) = self.primary.load_full() {
                return Some(primary);
            }
        }

        self.unkeyed
            .load()
            .iter()
            .find(|strategy| Self::allows(strategy, scope, context, request))
            .cloned()
    }

    /// Candidates for a collection request, in order
    fn candidates(
        &self,
        scope: &Scope,
        context: &InjectionContext,
        request: &LocateRequest,
    ) -> Vec<Arc<ExportStrategy>> {
        match &request.key {
            Some(selector) => {
                let keyed = self.keyed.load();
                selector
                    .keys()
                    .iter()
                    .filter_map(|key| keyed.get(key))
                    .filter(|strategy| Self::allows(strategy, scope, context, request))
                    .cloned()
                    .collect()
            }
            None => self
                .unkeyed
                .load()
                .iter()
                .filter(|strategy| Self::allows(strategy, scope, context, request))
                .cloned()
                .collect(),
        }
    }

    pub fn activate(
        &self,
        scope: &Scope,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Option<Located>, LocateError> {
        let Some(strategy) = self.best_match(scope, context, request) else {
            return Ok(None);
        };

        let instance = strategy.activate(scope, context, request.export_type())?;
        Ok(Some(Located::new(instance, Some(strategy))))
    }

    /// Activates every eligible producer, each with its own copy of the context
    pub fn activate_all(
        &self,
        scope: &Scope,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Vec<Located>, LocateError> {
        self.candidates(scope, context, request)
            .into_iter()
            .map(|strategy| {
                let mut element = context.clone_for_element();
                let instance = strategy.activate(scope, &mut element, request.export_type())?;
                Ok(Located::new(instance, Some(strategy)))
            })
            .collect()
    }

    /// Deferred values, nothing is activated until first access
    pub fn activate_all_lazy(
        &self,
        scope: &Scope,
        context: &InjectionContext,
        request: &LocateRequest,
    ) -> Vec<LazyExport> {
        self.candidates(scope, context, request)
            .into_iter()
            .map(|strategy| {
                LazyExport::strategy(
                    context.requesting_scope().clone(),
                    strategy,
                    request.export_type().cloned(),
                )
            })
            .collect()
    }

    /// Every value comes with its own disposal scope, owned by the caller
    pub fn activate_all_owned(
        &self,
        scope: &Scope,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Vec<(Instance, DisposalScope)>, LocateError> {
        self.candidates(scope, context, request)
            .into_iter()
            .map(|strategy| {
                let disposal = DisposalScope::new();
                let mut element = context.clone_for_element().with_disposal(disposal.clone());
                let instance = strategy.activate(scope, &mut element, request.export_type())?;
                Ok((instance, disposal))
            })
            .collect()
    }

    pub fn activate_all_meta(
        &self,
        scope: &Scope,
        context: &mut InjectionContext,
        request: &LocateRequest,
    ) -> Result<Vec<(Instance, Metadata)>, LocateError> {
        Ok(self
            .activate_all(scope, context, request)?
            .into_iter()
            .map(|located| {
                let metadata = located.metadata();
                (located.instance, metadata)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{export_type::ExportType, strategy::StrategyBuilder};

    fn sealed(scope: &Scope, builder: StrategyBuilder) -> Arc<ExportStrategy> {
        let mut strategy = builder.build().unwrap();
        strategy.seal(scope).unwrap();
        Arc::new(strategy)
    }

    fn located_value(scope: &Scope, collection: &StrategyCollection, request: &LocateRequest) -> Option<u32> {
        let mut context = InjectionContext::new(scope);
        collection
            .activate(scope, &mut context, request)
            .unwrap()
            .map(|located| *located.instance.downcast::<u32>().unwrap())
    }

    #[rstest]
    #[case(5, 10, 2)]
    #[case(10, 5, 1)]
    #[case(7, 7, 2)]
    fn higher_priority_then_later_registration_wins(
        #[case] first: i32,
        #[case] second: i32,
        #[case] expected: u32,
    ) {
        let scope = Scope::root();
        let collection = StrategyCollection::new(scope.id());
        collection.add_export(sealed(&scope, StrategyBuilder::instance(1_u32).priority(first)), None);
        collection.add_export(sealed(&scope, StrategyBuilder::instance(2_u32).priority(second)), None);

        let request = LocateRequest::of_type(ExportType::of::<u32>());
        assert_eq!(located_value(&scope, &collection, &request), Some(expected));
    }

    #[test]
    fn keyed_producers_need_their_key() {
        let scope = Scope::root();
        let collection = StrategyCollection::new(scope.id());
        collection.add_export(sealed(&scope, StrategyBuilder::instance(1_u32).keyed("a")), Some("a".into()));
        collection.add_export(sealed(&scope, StrategyBuilder::instance(2_u32).keyed("b")), Some("b".into()));

        let plain = LocateRequest::of_type(ExportType::of::<u32>());
        assert_eq!(located_value(&scope, &collection, &plain), None);

        let keyed = plain.clone().with_key("b");
        assert_eq!(located_value(&scope, &collection, &keyed), Some(2));

        let candidates = plain.with_key(["c", "a", "b"].into_iter().collect::<crate::types::KeySelector>());
        assert_eq!(located_value(&scope, &collection, &candidates), Some(1));
    }

    #[test]
    fn conditional_head_is_not_primary() {
        let scope = Scope::root();
        let collection = StrategyCollection::new(scope.id());
        collection.add_export(sealed(&scope, StrategyBuilder::instance(1_u32)), None);
        collection.add_export(
            sealed(
                &scope,
                StrategyBuilder::instance(2_u32)
                    .priority(3)
                    .when(|_: &Scope, _: &InjectionContext, _: &ExportStrategy| false),
            ),
            None,
        );

        assert!(collection.primary().is_none());
        let request = LocateRequest::of_type(ExportType::of::<u32>());
        assert_eq!(located_value(&scope, &collection, &request), Some(1));
    }

    #[test]
    fn filters_skip_producers_which_allow_it() {
        let scope = Scope::root();
        let collection = StrategyCollection::new(scope.id());
        collection.add_export(sealed(&scope, StrategyBuilder::instance(1_u32).metadata("fast", true)), None);
        collection.add_export(sealed(&scope, StrategyBuilder::instance(2_u32)), None);
        collection.add_export(
            sealed(&scope, StrategyBuilder::instance(3_u32).allows_filtering(false)),
            None,
        );

        let request = LocateRequest::of_type(ExportType::of::<u32>()).with_filter(Arc::new(
            |_: &InjectionContext, strategy: &ExportStrategy| strategy.metadata().contains_key("fast"),
        ));
        let mut context = InjectionContext::new(&scope);
        let values: Vec<u32> = collection
            .activate_all(&scope, &mut context, &request)
            .unwrap()
            .into_iter()
            .map(|located| *located.instance.downcast::<u32>().unwrap())
            .collect();
        assert_eq!(values, vec![3, 1]);
    }

    #[test]
    fn clones_do_not_see_later_writes() {
        let scope = Scope::root();
        let collection = StrategyCollection::new(scope.id());
        let first = sealed(&scope, StrategyBuilder::instance(1_u32));
        collection.add_export(first.clone(), None);

        let copy = collection.clone_for(ScopeId(u64::MAX));
        copy.add_export(sealed(&scope, StrategyBuilder::instance(2_u32)), None);
        assert_eq!(collection.len(), 1);
        assert_eq!(copy.len(), 2);

        assert!(copy.remove_export(&first));
        assert_eq!(collection.len(), 1);
        assert_eq!(copy.len(), 1);
    }
}
