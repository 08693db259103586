//! Spec tree registration.
//!
//! The tree is built once at startup: every suite module exposes a
//! `register(&mut Registry<_>)` function that opens groups with
//! [`Group::describe`], attaches hooks, and appends leaves with
//! [`Group::it`]. After registration the tree is only read.

use std::fmt;

/// Body of a leaf spec or hook.
pub type Thunk<C> = Box<dyn Fn(&mut C)>;

/// When a hook runs relative to the leaves of its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Once, before the first selected leaf of the group.
    BeforeAll,
    /// Before every selected leaf of the group.
    BeforeEach,
    /// After every selected leaf of the group, whatever its outcome.
    AfterEach,
    /// Once, after the last selected leaf of the group.
    AfterAll,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeAll => write!(f, "BeforeAll"),
            Self::BeforeEach => write!(f, "BeforeEach"),
            Self::AfterEach => write!(f, "AfterEach"),
            Self::AfterAll => write!(f, "AfterAll"),
        }
    }
}

/// A leaf of the tree.
pub struct Spec<C> {
    pub(crate) description: String,
    pub(crate) body: Thunk<C>,
}

impl<C> Spec<C> {
    /// Description of the spec.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

pub(crate) enum Node<C> {
    Group(Group<C>),
    Spec(Spec<C>),
}

/// An interior node: a described, ordered collection of groups and specs.
pub struct Group<C> {
    pub(crate) description: String,
    pub(crate) before_all: Vec<Thunk<C>>,
    pub(crate) before_each: Vec<Thunk<C>>,
    pub(crate) after_each: Vec<Thunk<C>>,
    pub(crate) after_all: Vec<Thunk<C>>,
    pub(crate) children: Vec<Node<C>>,
}

impl<C> fmt::Debug for Group<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("description", &self.description)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

impl<C> Group<C> {
    fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            before_all: Vec::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
            after_all: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Description of the group, including any `[Tag]` tokens.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Opens a child group and populates it with `body`.
    pub fn describe(&mut self, description: impl Into<String>, body: impl FnOnce(&mut Self)) {
        let mut group = Self::new(description);
        body(&mut group);
        self.children.push(Node::Group(group));
    }

    /// Appends a leaf spec.
    pub fn it(&mut self, description: impl Into<String>, body: impl Fn(&mut C) + 'static) {
        self.children.push(Node::Spec(Spec {
            description: description.into(),
            body: Box::new(body),
        }));
    }

    /// Attaches a hook for the given phase.
    pub fn hook(&mut self, phase: HookPhase, body: impl Fn(&mut C) + 'static) {
        let list = match phase {
            HookPhase::BeforeAll => &mut self.before_all,
            HookPhase::BeforeEach => &mut self.before_each,
            HookPhase::AfterEach => &mut self.after_each,
            HookPhase::AfterAll => &mut self.after_all,
        };
        list.push(Box::new(body));
    }

    /// Runs `body` once before the first selected leaf of this group.
    pub fn before_all(&mut self, body: impl Fn(&mut C) + 'static) {
        self.hook(HookPhase::BeforeAll, body);
    }

    /// Runs `body` before every selected leaf of this group.
    pub fn before_each(&mut self, body: impl Fn(&mut C) + 'static) {
        self.hook(HookPhase::BeforeEach, body);
    }

    /// Runs `body` after every selected leaf of this group.
    pub fn after_each(&mut self, body: impl Fn(&mut C) + 'static) {
        self.hook(HookPhase::AfterEach, body);
    }

    /// Runs `body` once after the last selected leaf of this group.
    pub fn after_all(&mut self, body: impl Fn(&mut C) + 'static) {
        self.hook(HookPhase::AfterAll, body);
    }

    /// Child groups, in registration order.
    pub fn groups(&self) -> impl Iterator<Item = &Self> {
        self.children.iter().filter_map(|child| match child {
            Node::Group(group) => Some(group),
            Node::Spec(_) => None,
        })
    }

    /// Total number of leaves below this group.
    #[must_use]
    pub fn spec_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                Node::Group(group) => group.spec_count(),
                Node::Spec(_) => 1,
            })
            .sum()
    }
}

/// Root of the spec tree plus suite-level hooks.
pub struct Registry<C> {
    pub(crate) root: Group<C>,
    pub(crate) before_suite: Vec<Thunk<C>>,
}

impl<C> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("specs", &self.root.spec_count())
            .field("before_suite", &self.before_suite.len())
            .finish()
    }
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Registry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Group::new(""),
            before_suite: Vec::new(),
        }
    }

    /// Registers a top-level group.
    pub fn describe(&mut self, description: impl Into<String>, body: impl FnOnce(&mut Group<C>)) {
        self.root.describe(description, body);
    }

    /// Registers a hook that runs once after discovery, before any spec.
    pub fn before_suite(&mut self, body: impl Fn(&mut C) + 'static) {
        self.before_suite.push(Box::new(body));
    }

    /// Total number of registered leaves.
    #[must_use]
    pub fn spec_count(&self) -> usize {
        self.root.spec_count()
    }

    /// Top-level groups, in registration order.
    pub fn groups(&self) -> impl Iterator<Item = &Group<C>> {
        self.root.groups()
    }
}
