//! End-to-end undo/redo behavior against the in-memory proxy manager.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use proptest::prelude::*;

use pvlive_core::{
    GlobalId, GlobalPropertyLink, InMemoryProxyManager, PropertyValue, ProxyEvent, ProxyManager,
    ProxyObserver, SessionRegistry,
};
use pvlive_undo::element::{Change, ProxyStateChange};
use pvlive_undo::{
    UndoConfig, UndoElement, UndoError, UndoRedoStateLoader, UndoSet, UndoStack, UndoStackBuilder,
};

struct Session {
    pm: InMemoryProxyManager,
    builder: Rc<RefCell<UndoStackBuilder>>,
    stack: UndoStack,
}

impl Session {
    fn new(config: UndoConfig) -> Self {
        Self::with_manager(InMemoryProxyManager::new(), config)
    }

    fn with_manager(mut pm: InMemoryProxyManager, config: UndoConfig) -> Self {
        let builder = UndoStackBuilder::shared(config.clone());
        UndoStackBuilder::install(&mut pm, &builder);
        Session {
            pm,
            builder,
            stack: UndoStack::new(config),
        }
    }

    /// Runs `f` inside a recording window and pushes the result. Returns
    /// whether a set was pushed.
    fn record(&mut self, label: &str, f: impl FnOnce(&mut InMemoryProxyManager)) -> bool {
        let scope = self.builder.borrow_mut().begin(label);
        f(&mut self.pm);
        self.builder
            .borrow_mut()
            .end_and_push_to_stack(scope, &mut self.stack)
            .unwrap()
    }
}

/// Registration and property events, in the order the manager fired them.
#[derive(Default)]
struct Trace {
    events: Vec<String>,
}

impl ProxyObserver for Trace {
    fn on_proxy_event(&mut self, event: &ProxyEvent) {
        let entry = match event {
            ProxyEvent::Registered { name, .. } => format!("register {name}"),
            ProxyEvent::UnRegistered { name, .. } => format!("unregister {name}"),
            ProxyEvent::PropertyModified { id, name, .. } => format!("modify {id}.{name}"),
            _ => return,
        };
        self.events.push(entry);
    }
}

fn traced(s: &mut Session) -> Rc<RefCell<Trace>> {
    let trace = Rc::new(RefCell::new(Trace::default()));
    s.pm.observe(0, trace.clone());
    trace
}

fn take(trace: &Rc<RefCell<Trace>>) -> Vec<String> {
    std::mem::take(&mut trace.borrow_mut().events)
}

fn unbounded() -> UndoConfig {
    UndoConfig {
        stack_depth: None,
        ..UndoConfig::default()
    }
}

#[derive(Debug, Clone)]
enum Op {
    Create,
    SetRadius(usize, u8),
    Unregister(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Create),
        (any::<usize>(), 0u8..5).prop_map(|(i, v)| Op::SetRadius(i, v)),
        any::<usize>().prop_map(Op::Unregister),
    ]
}

proptest! {
    #[test]
    fn undo_and_redo_walk_back_through_saved_states(ops in prop::collection::vec(op(), 1..12)) {
        let mut s = Session::new(unbounded());
        let mut snapshots = vec![s.pm.save_state()];
        let mut created = 0;

        for op in ops {
            let registrations = s.pm.registrations();
            let pushed = match op {
                Op::Create => {
                    created += 1;
                    let name = format!("Sphere{created}");
                    s.record("Create", |pm| {
                        let id = pm
                            .create_registered("sources", &name, "sources", "SphereSource")
                            .unwrap();
                        pm.set_property(id, "Radius", PropertyValue::scalar(0.5)).unwrap();
                    })
                }
                Op::SetRadius(i, v) => {
                    if registrations.is_empty() {
                        continue;
                    }
                    let (_, _, id) = registrations[i % registrations.len()].clone();
                    s.record("Radius", |pm| {
                        pm.set_property(id, "Radius", PropertyValue::scalar(v)).unwrap();
                    })
                }
                Op::Unregister(i) => {
                    if registrations.is_empty() {
                        continue;
                    }
                    let (group, name, _) = registrations[i % registrations.len()].clone();
                    s.record("Delete", |pm| {
                        pm.unregister_proxy(&group, &name).unwrap();
                    })
                }
            };
            if pushed {
                snapshots.push(s.pm.save_state());
            }
        }

        for expected in snapshots.iter().rev().skip(1) {
            s.stack.undo(&mut s.pm).unwrap();
            prop_assert_eq!(&s.pm.save_state(), expected);
        }
        prop_assert!(!s.stack.can_undo());

        for expected in snapshots.iter().skip(1) {
            s.stack.redo(&mut s.pm).unwrap();
            prop_assert_eq!(&s.pm.save_state(), expected);
        }
        prop_assert!(!s.stack.can_redo());
    }
}

#[test]
fn undo_applies_elements_in_reverse_order() {
    let mut s = Session::new(UndoConfig::default());
    let a = s.pm.create_proxy("sources", "SphereSource", None).unwrap();
    let b = s.pm.create_proxy("sources", "ConeSource", None).unwrap();
    s.pm.set_property(a, "Radius", PropertyValue::scalar(1)).unwrap();
    s.pm.set_property(b, "Radius", PropertyValue::scalar(1)).unwrap();
    let trace = traced(&mut s);

    s.record("Both", |pm| {
        pm.set_property(a, "Radius", PropertyValue::scalar(2)).unwrap();
        pm.set_property(b, "Radius", PropertyValue::scalar(2)).unwrap();
    });
    take(&trace);

    s.stack.undo(&mut s.pm).unwrap();
    assert_eq!(take(&trace), [format!("modify {b}.Radius"), format!("modify {a}.Radius")]);

    s.stack.redo(&mut s.pm).unwrap();
    assert_eq!(take(&trace), [format!("modify {a}.Radius"), format!("modify {b}.Radius")]);
}

#[test]
fn undo_reverts_property_before_unregistering_its_proxy() {
    let mut s = Session::new(UndoConfig::default());
    let trace = traced(&mut s);
    let empty = s.pm.save_state();

    let mut id = GlobalId(0);
    s.record("Create", |pm| {
        id = pm
            .create_registered("sources", "Sphere1", "sources", "SphereSource")
            .unwrap();
        pm.set_property(id, "Radius", PropertyValue::scalar(0.5)).unwrap();
    });
    let configured = s.pm.save_state();
    take(&trace);

    s.stack.undo(&mut s.pm).unwrap();
    assert_eq!(
        take(&trace),
        [format!("modify {id}.Radius"), "unregister Sphere1".to_string()]
    );
    assert_eq!(s.pm.save_state(), empty);

    s.stack.redo(&mut s.pm).unwrap();
    assert_eq!(
        take(&trace),
        ["register Sphere1".to_string(), format!("modify {id}.Radius")]
    );
    assert_eq!(s.pm.save_state(), configured);
    assert_eq!(
        s.pm.proxy(id).unwrap().property("Radius"),
        Some(&PropertyValue::scalar(0.5))
    );
}

#[test]
fn undo_removes_a_property_the_proxy_did_not_have() {
    let mut s = Session::new(UndoConfig::default());
    let id = s
        .pm
        .create_registered("sources", "Sphere1", "sources", "SphereSource")
        .unwrap();
    let bare = s.pm.save_state();

    s.record("Radius", |pm| pm.set_property(id, "Radius", PropertyValue::scalar(2)).unwrap());
    let set = s.stack.undo_sets().last().unwrap().clone();
    let reloaded = UndoRedoStateLoader::load_undo_set_str(&set.to_xml().to_xml_string().unwrap())
        .unwrap();
    assert_eq!(reloaded, set);

    s.stack.undo(&mut s.pm).unwrap();
    assert_eq!(s.pm.save_state(), bare);
    s.stack.redo(&mut s.pm).unwrap();
    assert_eq!(
        s.pm.proxy(id).unwrap().property("Radius"),
        Some(&PropertyValue::scalar(2))
    );
}

#[test]
fn removed_property_comes_back_on_undo() {
    let mut s = Session::new(UndoConfig::default());
    let id = s
        .pm
        .create_registered("sources", "Sphere1", "sources", "SphereSource")
        .unwrap();
    s.pm.set_property(id, "Radius", PropertyValue::scalar(4)).unwrap();

    s.record("Reset", |pm| pm.remove_property(id, "Radius").unwrap());
    assert_eq!(s.pm.proxy(id).unwrap().property("Radius"), None);

    s.stack.undo(&mut s.pm).unwrap();
    assert_eq!(
        s.pm.proxy(id).unwrap().property("Radius"),
        Some(&PropertyValue::scalar(4))
    );
    s.stack.redo(&mut s.pm).unwrap();
    assert_eq!(s.pm.proxy(id).unwrap().property("Radius"), None);
}

#[test]
fn undoing_a_state_load_drops_properties_it_added() {
    let mut s = Session::new(UndoConfig::default());
    let id = s
        .pm
        .create_registered("sources", "Sphere1", "sources", "SphereSource")
        .unwrap();
    let bare = s.pm.save_state();

    let mut loaded = s.pm.proxy(id).unwrap().clone();
    loaded.set_property("Center", PropertyValue::scalar(1));
    let state = loaded.to_xml();
    s.record("Load", |pm| pm.load_proxy_state(id, &state).unwrap());

    s.stack.undo(&mut s.pm).unwrap();
    assert_eq!(s.pm.save_state(), bare);
    s.stack.redo(&mut s.pm).unwrap();
    assert_eq!(s.pm.proxy(id).unwrap().to_xml(), state);
}

#[test]
fn undo_does_not_record_itself() {
    let mut s = Session::new(UndoConfig::default());
    s.record("Create", |pm| {
        pm.create_registered("sources", "Sphere1", "sources", "SphereSource")
            .unwrap();
    });
    s.stack.undo(&mut s.pm).unwrap();
    assert!(s.builder.borrow().current_set().is_empty());
    assert_eq!(s.stack.undo_len(), 0);
    assert_eq!(s.stack.redo_len(), 1);
}

#[test]
fn new_push_after_undo_discards_redo_history() {
    let mut s = Session::new(UndoConfig::default());
    let id = s
        .pm
        .create_registered("sources", "Sphere1", "sources", "SphereSource")
        .unwrap();
    s.record("First", |pm| pm.set_property(id, "Radius", PropertyValue::scalar(1)).unwrap());
    s.record("Second", |pm| pm.set_property(id, "Radius", PropertyValue::scalar(2)).unwrap());

    s.stack.undo(&mut s.pm).unwrap();
    assert_eq!(s.stack.redo_label(), Some("Second"));

    s.record("Third", |pm| pm.set_property(id, "Radius", PropertyValue::scalar(3)).unwrap());
    assert!(!s.stack.can_redo());
    assert_eq!(s.stack.undo_label(), Some("Third"));
    assert!(matches!(s.stack.redo(&mut s.pm), Err(UndoError::NothingToRedo)));
}

#[test]
fn each_pass_gets_a_fresh_locator() {
    let mut pm = InMemoryProxyManager::new();
    let id = pm.create_proxy("sources", "SphereSource", None).unwrap();
    pm.set_property(id, "Radius", PropertyValue::scalar(1)).unwrap();
    let before = pm.proxy(id).unwrap().to_xml();
    pm.set_property(id, "Radius", PropertyValue::scalar(2)).unwrap();
    let after = pm.proxy(id).unwrap().to_xml();
    // Proxy goes away; the set still describes it.
    pm.release_proxy(id);
    assert!(!pm.contains(id));

    let mut set = UndoSet::new("State");
    set.push(UndoElement::new(Change::ProxyStateChanged(ProxyStateChange {
        id,
        before: Some(before),
        after: Some(after),
    })));
    let mut stack = UndoStack::default();
    stack.push(set);

    let created = pm.creation_count();
    stack.undo(&mut pm).unwrap();
    // Recreated for the pass, then released with the pass's locator.
    assert_eq!(pm.creation_count(), created + 1);
    assert!(!pm.contains(id));

    stack.redo(&mut pm).unwrap();
    assert_eq!(pm.creation_count(), created + 2);
    assert!(!pm.contains(id));
}

#[test]
fn merged_and_unmerged_recordings_undo_alike() {
    for merge in [false, true] {
        let mut s = Session::new(UndoConfig {
            merge_property_modifications: merge,
            ..UndoConfig::default()
        });
        let id = s
            .pm
            .create_registered("sources", "Sphere1", "sources", "SphereSource")
            .unwrap();
        s.pm.set_property(id, "Radius", PropertyValue::scalar(0)).unwrap();

        s.record("Drag", |pm| {
            for radius in 1..=5 {
                pm.set_property(id, "Radius", PropertyValue::scalar(radius)).unwrap();
            }
        });
        let recorded = s.stack.undo_sets().last().unwrap().len();
        assert_eq!(recorded, if merge { 1 } else { 5 });

        s.stack.undo(&mut s.pm).unwrap();
        assert_eq!(
            s.pm.proxy(id).unwrap().property("Radius"),
            Some(&PropertyValue::scalar(0))
        );
        s.stack.redo(&mut s.pm).unwrap();
        assert_eq!(
            s.pm.proxy(id).unwrap().property("Radius"),
            Some(&PropertyValue::scalar(5))
        );
    }
}

#[test]
fn set_spanning_sessions_is_refused_without_side_effects() {
    let sessions = Arc::new(SessionRegistry::new());
    let mut first = InMemoryProxyManager::with_sessions(sessions.clone());
    let mut second = InMemoryProxyManager::with_sessions(sessions.clone());
    let a = first.create_proxy("sources", "SphereSource", None).unwrap();
    let b = second.create_proxy("sources", "SphereSource", None).unwrap();
    first.set_property(a, "Radius", PropertyValue::scalar(1)).unwrap();
    second.set_property(b, "Radius", PropertyValue::scalar(1)).unwrap();

    let builder = UndoStackBuilder::shared(UndoConfig::default());
    UndoStackBuilder::install(&mut first, &builder);
    UndoStackBuilder::install(&mut second, &builder);

    let mut stack = UndoStack::default();
    let scope = builder.borrow_mut().begin("Both sessions");
    first.set_property(a, "Radius", PropertyValue::scalar(2)).unwrap();
    second.set_property(b, "Radius", PropertyValue::scalar(2)).unwrap();
    builder
        .borrow_mut()
        .end_and_push_to_stack(scope, &mut stack)
        .unwrap();

    let err = stack.undo(&mut first).unwrap_err();
    assert!(matches!(err, UndoError::MultipleSessions { ref sessions } if sessions.len() == 2));
    assert_eq!(
        first.proxy(a).unwrap().property("Radius"),
        Some(&PropertyValue::scalar(2))
    );
    assert_eq!(stack.undo_len(), 1);
    assert_eq!(stack.redo_len(), 0);
}

#[test]
fn failed_undo_leaves_history_untouched() {
    let mut s = Session::new(UndoConfig::default());
    let id = s
        .pm
        .create_registered("sources", "Sphere1", "sources", "SphereSource")
        .unwrap();
    s.record("Radius", |pm| pm.set_property(id, "Radius", PropertyValue::scalar(3)).unwrap());

    // Deleted behind the stack's back, outside any recording window.
    s.pm.unregister_proxy("sources", "Sphere1").unwrap();
    assert!(!s.pm.contains(id));

    let err = s.stack.undo(&mut s.pm).unwrap_err();
    match err {
        UndoError::ElementFailed { index, source, .. } => {
            assert_eq!(index, 0);
            assert!(matches!(*source, UndoError::ProxyUnresolved { id: missing } if missing == id));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(s.stack.undo_len(), 1);
    assert_eq!(s.stack.redo_len(), 0);
    assert_eq!(s.stack.undo_label(), Some("Radius"));
}

#[test]
fn global_link_replay_is_skipped_while_sessions_are_ambiguous() {
    let sessions = Arc::new(SessionRegistry::new());
    let pm = InMemoryProxyManager::with_sessions(sessions.clone());
    let mut s = Session::with_manager(pm, UndoConfig::default());
    let other = InMemoryProxyManager::with_sessions(sessions.clone());

    let id = s
        .pm
        .create_registered("representations", "Repr1", "representations", "GeometryRepresentation")
        .unwrap();
    let link = GlobalPropertyLink {
        manager: "ColorPalette".to_string(),
        global_property: "ForegroundColor".to_string(),
        proxy: id,
        property: "AmbientColor".to_string(),
    };
    let recorded = link.clone();
    s.record("Link", |pm| pm.link_global_property(recorded).unwrap());

    // Two sessions alive: undo succeeds but leaves the link alone.
    s.stack.undo(&mut s.pm).unwrap();
    assert_eq!(s.pm.global_property_links(), [link.clone()]);

    drop(other);
    assert_eq!(s.pm.active_session_count(), 1);

    s.stack.redo(&mut s.pm).unwrap();
    s.stack.undo(&mut s.pm).unwrap();
    assert!(s.pm.global_property_links().is_empty());
}

#[test]
fn information_updates_only_replay_forward() {
    let mut s = Session::new(UndoConfig::default());
    let id = s
        .pm
        .create_registered("sources", "Reader1", "sources", "XMLReader")
        .unwrap();
    s.record("Refresh", |pm| pm.update_information(id).unwrap());
    assert_eq!(s.pm.proxy(id).unwrap().information_generation, 1);

    s.stack.undo(&mut s.pm).unwrap();
    assert_eq!(s.pm.proxy(id).unwrap().information_generation, 1);
    s.stack.redo(&mut s.pm).unwrap();
    assert_eq!(s.pm.proxy(id).unwrap().information_generation, 2);
}

#[test]
fn serialized_set_loads_back_and_undoes() {
    let mut s = Session::new(UndoConfig::default());
    s.record("Build Pipeline", |pm| {
        let sphere = pm
            .create_registered("sources", "Sphere1", "sources", "SphereSource")
            .unwrap();
        pm.set_property(sphere, "Radius", PropertyValue::scalar(0.5)).unwrap();
        let shrink = pm
            .create_registered("sources", "Shrink1", "filters", "ShrinkFilter")
            .unwrap();
        pm.set_property(shrink, "Input", PropertyValue::proxy(sphere)).unwrap();
        pm.update_information(shrink).unwrap();
    });
    let set = s.stack.undo_sets().last().unwrap().clone();

    let text = set.to_xml().to_xml_string().unwrap();
    let loaded = UndoRedoStateLoader::load_undo_set_str(&text).unwrap();
    assert_eq!(loaded, set);
    assert_eq!(loaded.label(), "Build Pipeline");
    assert_eq!(loaded.number_of_elements(), 5);

    loaded.undo(&mut s.pm).unwrap();
    assert!(s.pm.registrations().is_empty());
    assert_eq!(s.pm.proxy_count(), 0);

    loaded.redo(&mut s.pm).unwrap();
    assert_eq!(s.pm.registrations().len(), 2);
}
