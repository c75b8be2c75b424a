//! Recording of proxy-manager events into undo sets.
//!
//! An [`UndoStackBuilder`] observes a proxy manager. Between a
//! [`begin`](UndoStackBuilder::begin) and the matching
//! [`end`](UndoStackBuilder::end) it turns every [`ProxyEvent`] into an
//! [`UndoElement`] of the set being recorded. Windows nest: only the
//! outermost `begin` names the set, and the set is complete when the
//! outermost `end` returns.
//!
//! ```ignore
//! let builder = UndoStackBuilder::shared(UndoConfig::default());
//! UndoStackBuilder::install(&mut pm, &builder);
//!
//! let scope = builder.borrow_mut().begin("Change Radius");
//! pm.set_property(id, "Radius", PropertyValue::scalar(2))?;
//! builder.borrow_mut().end_and_push_to_stack(scope, &mut stack)?;
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use pvlive_core::{ObserverHandle, ProxyEvent, ProxyManager, ProxyObserver};

use crate::config::UndoConfig;
use crate::element::{
    Change, GlobalPropertiesLinkChange, InformationUpdate, PropertyModification,
    ProxyRegistration, ProxyStateChange, UndoElement,
};
use crate::error::UndoError;
use crate::set::UndoSet;
use crate::stack::UndoStack;

/// Observer priority the builder registers with. Observers that must see
/// events after they are recorded use a lower priority.
pub const BUILDER_PRIORITY: i32 = 100;

static NEXT_BUILDER: AtomicU64 = AtomicU64::new(1);

/// Token for one open recording window, returned by
/// [`UndoStackBuilder::begin`] and consumed by [`UndoStackBuilder::end`].
#[derive(Debug)]
#[must_use = "a recording window stays open until its scope is passed to end()"]
pub struct RecordingScope {
    builder: u64,
    /// Issued while changes were ignored; ending it changes nothing.
    noop: bool,
}

impl RecordingScope {
    pub fn is_noop(&self) -> bool {
        self.noop
    }
}

/// Groups proxy-manager events into [`UndoSet`]s.
#[derive(Debug)]
pub struct UndoStackBuilder {
    id: u64,
    config: UndoConfig,
    depth: usize,
    ignore_all_changes: bool,
    set: UndoSet,
}

impl UndoStackBuilder {
    pub fn new(config: UndoConfig) -> Self {
        UndoStackBuilder {
            id: NEXT_BUILDER.fetch_add(1, Ordering::Relaxed),
            config,
            depth: 0,
            ignore_all_changes: false,
            set: UndoSet::default(),
        }
    }

    /// Builder behind the shared handle observers are registered with.
    pub fn shared(config: UndoConfig) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(config)))
    }

    /// Registers `builder` as an observer of `pm` at [`BUILDER_PRIORITY`].
    pub fn install(pm: &mut dyn ProxyManager, builder: &Rc<RefCell<Self>>) {
        let handle: ObserverHandle = builder.clone();
        pm.add_observer(BUILDER_PRIORITY, handle);
    }

    pub fn config(&self) -> &UndoConfig {
        &self.config
    }

    /// Opens a recording window. While changes are ignored the window is a
    /// no-op and nothing is recorded.
    pub fn begin(&mut self, label: impl Into<String>) -> RecordingScope {
        if self.ignore_all_changes {
            return RecordingScope {
                builder: self.id,
                noop: true,
            };
        }
        self.depth += 1;
        if self.depth == 1 {
            self.set.set_label(label);
        }
        RecordingScope {
            builder: self.id,
            noop: false,
        }
    }

    /// Closes the window `scope` opened.
    pub fn end(&mut self, scope: RecordingScope) -> Result<(), UndoError> {
        if scope.builder != self.id {
            return Err(UndoError::ForeignScope);
        }
        if scope.noop {
            return Ok(());
        }
        if self.depth == 0 {
            tracing::warn!("undo recording ended without a matching begin");
            return Err(UndoError::UnmatchedEnd);
        }
        self.depth -= 1;
        Ok(())
    }

    /// Hands the recorded set to `stack` and starts a fresh one. An empty
    /// set is discarded. Returns whether a set was pushed.
    pub fn push_to_stack(&mut self, stack: &mut UndoStack) -> bool {
        if self.set.is_empty() {
            return false;
        }
        let set = std::mem::take(&mut self.set);
        tracing::debug!(label = %set.label(), elements = set.len(), "pushing undo set");
        stack.push(set);
        true
    }

    /// [`end`](Self::end), then [`push_to_stack`](Self::push_to_stack) if
    /// that closed the outermost window.
    pub fn end_and_push_to_stack(
        &mut self,
        scope: RecordingScope,
        stack: &mut UndoStack,
    ) -> Result<bool, UndoError> {
        self.end(scope)?;
        if self.depth > 0 {
            return Ok(false);
        }
        Ok(self.push_to_stack(stack))
    }

    pub fn set_ignore_all_changes(&mut self, ignore: bool) {
        self.ignore_all_changes = ignore;
    }

    pub fn ignore_all_changes(&self) -> bool {
        self.ignore_all_changes
    }

    /// Whether an event arriving now would be recorded.
    pub fn is_recording(&self) -> bool {
        self.depth > 0 && !self.ignore_all_changes
    }

    /// Set being recorded.
    pub fn current_set(&self) -> &UndoSet {
        &self.set
    }

    /// Appends an element to the current set, merging it into the last one
    /// when merging is enabled. Dropped while changes are ignored.
    pub fn add(&mut self, element: UndoElement) {
        if self.ignore_all_changes {
            return;
        }
        self.set
            .add(element, self.config.merge_property_modifications);
    }

    /// Discards everything recorded so far. Open windows stay open.
    pub fn clear(&mut self) {
        self.set.clear();
    }
}

impl ProxyObserver for UndoStackBuilder {
    fn on_proxy_event(&mut self, event: &ProxyEvent) {
        if !self.is_recording() {
            return;
        }
        match element_for(event) {
            Some(element) => self.add(element),
            None => tracing::warn!(?event, "could not record proxy event"),
        }
    }
}

fn element_for(event: &ProxyEvent) -> Option<UndoElement> {
    let (session, change) = match event {
        ProxyEvent::Registered {
            session,
            group,
            name,
            state,
            ..
        } => {
            let registration = ProxyRegistration::from_state(group, name, state.clone()).ok()?;
            (*session, Change::ProxyRegister(registration))
        }
        ProxyEvent::UnRegistered {
            session,
            group,
            name,
            state,
            ..
        } => {
            let registration = ProxyRegistration::from_state(group, name, state.clone()).ok()?;
            (*session, Change::ProxyUnRegister(registration))
        }
        ProxyEvent::PropertyModified {
            session,
            id,
            name,
            old_value,
            new_value,
        } => (
            *session,
            Change::PropertyModification(PropertyModification {
                id: *id,
                name: name.clone(),
                last_pushed_value: Some(old_value.clone()),
                new_value: Some(new_value.clone()),
            }),
        ),
        ProxyEvent::StateChanged {
            session,
            id,
            before,
            after,
        } => (
            *session,
            Change::ProxyStateChanged(ProxyStateChange {
                id: *id,
                before: Some(before.clone()),
                after: Some(after.clone()),
            }),
        ),
        ProxyEvent::GlobalPropertyLinkChanged {
            session,
            link,
            added,
        } => (
            *session,
            Change::GlobalPropertiesLink(GlobalPropertiesLinkChange {
                link: link.clone(),
                link_added: *added,
            }),
        ),
        ProxyEvent::InformationUpdated { session, id } => (
            *session,
            Change::UpdateInformation(InformationUpdate { id: *id }),
        ),
    };
    Some(UndoElement::new(change).with_session(session))
}
