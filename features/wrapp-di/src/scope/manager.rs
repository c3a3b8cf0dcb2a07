use std::{collections::HashMap, fmt, sync::Arc};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};

use crate::{
    disposal::DisposalScope,
    errors::ConfigureError,
    extension::{ExportStrategyInspector, SharedInspector},
    scope::{registration::RegistrationBlock, Scope},
};

type NamedRegistration = Arc<dyn Fn(&mut RegistrationBlock) + Send + Sync>;
type ChildRegistration = Box<dyn FnOnce(&mut RegistrationBlock) + Send>;

/// How a child scope is created
#[derive(Default)]
pub struct ChildScopeOptions {
    name: Option<String>,
    registration: Option<ChildRegistration>,
    disposal: Option<DisposalScope>,
}

impl fmt::Debug for ChildScopeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildScopeOptions")
            .field("name", &self.name)
            .field("registration", &self.registration.is_some())
            .field("disposal", &self.disposal.is_some())
            .finish()
    }
}

impl ChildScopeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Children named like a configured named scope start with its registrations
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Registrations only this child sees
    pub fn configure(mut self, registration: impl FnOnce(&mut RegistrationBlock) + Send + 'static) -> Self {
        self.registration = Some(Box::new(registration));
        self
    }

    /// Dispose the child's values through an existing disposal scope
    pub fn disposal(mut self, disposal: DisposalScope) -> Self {
        self.disposal = Some(disposal);
        self
    }
}

/// Shared by every scope of one tree
///
/// Holds the registrations of named scopes, the detached scopes they are
/// built into, and inspectors which see every registration in the tree.
#[derive(Default)]
pub struct ScopeManager {
    named: RwLock<HashMap<String, NamedRegistration>>,
    templates: Mutex<HashMap<String, Scope>>,
    inspectors: ArcSwap<Vec<SharedInspector>>,
}

impl fmt::Debug for ScopeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut named: Vec<String> = self.named.read().keys().cloned().collect();
        named.sort();
        f.debug_struct("ScopeManager")
            .field("named", &named)
            .field("templates", &self.templates.lock().len())
            .field("inspectors", &self.inspectors.load().len())
            .finish()
    }
}

impl ScopeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registrations for every child scope created with `name`
    ///
    /// They run once, into a scope shared by all such children. Replacing the
    /// registrations of a name drops what was built for it before.
    pub fn configure_named_scope(
        &self,
        name: &str,
        registration: impl Fn(&mut RegistrationBlock) + Send + Sync + 'static,
    ) {
        self.named
            .write()
            .insert(name.to_string(), Arc::new(registration));

        let replaced = self.templates.lock().remove(name);
        if let Some(template) = replaced {
            template.dispose();
        }
    }

    pub fn has_named_scope(&self, name: &str) -> bool {
        self.named.read().contains_key(name)
    }

    /// Inspects every producer registered anywhere in the tree
    pub fn add_inspector(&self, inspector: impl ExportStrategyInspector + 'static) {
        let mut inspectors = Vec::clone(&self.inspectors.load());
        inspectors.push(Arc::new(inspector));
        self.inspectors.store(Arc::new(inspectors));
    }

    pub(crate) fn inspectors(&self) -> Arc<Vec<SharedInspector>> {
        self.inspectors.load_full()
    }

    pub(crate) fn create_child(
        &self,
        parent: &Scope,
        options: ChildScopeOptions,
    ) -> Result<Scope, ConfigureError> {
        let ChildScopeOptions {
            name,
            registration,
            disposal,
        } = options;

        let template = match &name {
            Some(name) => self.template(parent, name)?,
            None => None,
        };
        let child = match &template {
            Some(template) => Scope::from_template(parent, template, name.as_deref(), disposal),
            None => Scope::new_child(parent, name.as_deref(), disposal),
        };

        if let Some(registration) = registration {
            let mut block = RegistrationBlock::new();
            registration(&mut block);
            child.register(block.finish()?)?;
        }

        tracing::debug!(
            "Created scope {} under {}",
            child.display_name(),
            parent.display_name()
        );
        Ok(child)
    }

    /// The detached scope holding the registrations of `name`, built on first use
    fn template(&self, parent: &Scope, name: &str) -> Result<Option<Scope>, ConfigureError> {
        let Some(registration) = self.named.read().get(name).cloned() else {
            return Ok(None);
        };

        let mut templates = self.templates.lock();
        if let Some(template) = templates.get(name) {
            return Ok(Some(template.clone()));
        }

        let template = Scope::detached(parent, name);
        let mut block = RegistrationBlock::new();
        registration(&mut block);
        template.register(block.finish()?)?;

        tracing::debug!("Built registrations of named scope '{name}'");
        templates.insert(name.to_string(), template.clone());
        Ok(Some(template))
    }

    /// Disposes the shared scopes of all named scopes
    pub(crate) fn dispose_templates(&self) {
        let templates: Vec<Scope> = self.templates.lock().drain().map(|(_, scope)| scope).collect();
        for template in templates {
            template.dispose();
        }
    }
}
