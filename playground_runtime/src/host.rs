//! Host capabilities available to user code.
//!
//! The runtime never touches platform globals directly. Console, network,
//! DOM and timer primitives live in optional slots of a [`HostContext`];
//! instrumentation swaps a slot's occupant for a recording wrapper and puts
//! the original back afterwards.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use serde::Serialize;
use thiserror::Error;

/// A boxed future that may borrow and is not `Send`.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Console method families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    /// Maps a `console.<method>` name to its level.
    pub fn from_method(name: &str) -> Option<Self> {
        match name {
            "log" => Some(Self::Log),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ConsoleHost {
    fn write(&self, level: LogLevel, message: &str);
}

/// An outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: String,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Failed to fetch {url}: {reason}")]
    Failed { url: String, reason: String },
    #[error("request to {0} was aborted")]
    Aborted(String),
}

/// Network primitives: `fetch` and `XMLHttpRequest`.
pub trait NetworkHost {
    fn fetch(&self, request: Request) -> LocalBoxFuture<'_, Result<Response, NetworkError>>;

    /// Called when a script calls `open()` on an `XMLHttpRequest`. Nothing
    /// goes over the wire until [`NetworkHost::xhr_send`].
    fn xhr_open(&self, _method: &str, _url: &str) {}

    /// Performs the request of an opened `XMLHttpRequest` when `send()` is
    /// called.
    fn xhr_send(&self, request: Request) -> LocalBoxFuture<'_, Result<Response, NetworkError>>;
}

/// Opaque handle to a DOM node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("node {0:?} does not exist")]
    UnknownNode(NodeId),
    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("inserting {0:?} would create a cycle")]
    HierarchyRequest(NodeId),
}

/// DOM tree primitives. The mutating methods are the instrumented set.
pub trait DomHost {
    fn document_body(&self) -> NodeId;
    fn create_element(&self, tag: &str) -> NodeId;
    fn set_text_content(&self, node: NodeId, text: &str) -> Result<(), DomError>;

    fn append_child(&self, parent: NodeId, child: NodeId) -> Result<NodeId, DomError>;
    fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<NodeId, DomError>;
    fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<NodeId, DomError>;
    fn replace_child(
        &self,
        parent: NodeId,
        new_child: NodeId,
        old_child: NodeId,
    ) -> Result<NodeId, DomError>;
    fn replace_children(&self, parent: NodeId, children: &[NodeId]) -> Result<(), DomError>;
}

/// Handle returned by the timer primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Timer and task scheduling primitives.
///
/// Only registration is modeled; callbacks are owned by the evaluator.
pub trait TimerHost {
    fn set_timeout(&self, delay_ms: f64) -> TimerId;
    fn set_interval(&self, delay_ms: f64) -> TimerId;
    fn request_animation_frame(&self) -> TimerId;
    fn clear_timer(&self, id: TimerId);

    /// Called whenever a promise continuation is queued.
    fn queue_microtask(&self) {}
}

/// Heap usage introspection, when the platform offers it.
pub trait HeapProbe {
    fn used_heap_bytes(&self) -> Option<u64>;
}

/// A swappable host slot.
pub type Slot<T> = RefCell<Option<Rc<T>>>;

/// The set of host primitives visible to user code.
///
/// Slots are optional so partial environments can be described; an empty
/// slot is simply skipped by instrumentation.
#[derive(Default)]
pub struct HostContext {
    pub(crate) console: Slot<dyn ConsoleHost>,
    pub(crate) network: Slot<dyn NetworkHost>,
    pub(crate) dom: Slot<dyn DomHost>,
    pub(crate) timers: Slot<dyn TimerHost>,
}

impl HostContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_console(self, console: Rc<dyn ConsoleHost>) -> Self {
        self.set_console(Some(console));
        self
    }

    pub fn with_network(self, network: Rc<dyn NetworkHost>) -> Self {
        self.set_network(Some(network));
        self
    }

    pub fn with_dom(self, dom: Rc<dyn DomHost>) -> Self {
        self.set_dom(Some(dom));
        self
    }

    pub fn with_timers(self, timers: Rc<dyn TimerHost>) -> Self {
        self.set_timers(Some(timers));
        self
    }

    pub fn console(&self) -> Option<Rc<dyn ConsoleHost>> {
        self.console.borrow().clone()
    }

    pub fn network(&self) -> Option<Rc<dyn NetworkHost>> {
        self.network.borrow().clone()
    }

    pub fn dom(&self) -> Option<Rc<dyn DomHost>> {
        self.dom.borrow().clone()
    }

    pub fn timers(&self) -> Option<Rc<dyn TimerHost>> {
        self.timers.borrow().clone()
    }

    /// Replaces the console, returning the previous occupant.
    pub fn set_console(&self, console: Option<Rc<dyn ConsoleHost>>) -> Option<Rc<dyn ConsoleHost>> {
        self.console.replace(console)
    }

    pub fn set_network(&self, network: Option<Rc<dyn NetworkHost>>) -> Option<Rc<dyn NetworkHost>> {
        self.network.replace(network)
    }

    pub fn set_dom(&self, dom: Option<Rc<dyn DomHost>>) -> Option<Rc<dyn DomHost>> {
        self.dom.replace(dom)
    }

    pub fn set_timers(&self, timers: Option<Rc<dyn TimerHost>>) -> Option<Rc<dyn TimerHost>> {
        self.timers.replace(timers)
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("console", &self.console.borrow().is_some())
            .field("network", &self.network.borrow().is_some())
            .field("dom", &self.dom.borrow().is_some())
            .field("timers", &self.timers.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl ConsoleHost for Silent {
        fn write(&self, _level: LogLevel, _message: &str) {}
    }

    #[test]
    fn test_log_level_from_method() {
        assert_eq!(LogLevel::from_method("warn"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_method("table"), None);
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_slots_swap() {
        let first: Rc<dyn ConsoleHost> = Rc::new(Silent);
        let host = HostContext::new().with_console(first.clone());
        assert!(host.network().is_none());

        let previous = host.set_console(Some(Rc::new(Silent)));
        assert!(Rc::ptr_eq(&previous.unwrap(), &first));
        assert!(!Rc::ptr_eq(&host.console().unwrap(), &first));
    }
}
