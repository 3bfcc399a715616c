//! Runtime instrumentation sessions.
//!
//! [`instrument_runtime`] swaps every occupied host slot for a wrapper that
//! reports to the tracker and then forwards the call unchanged. The returned
//! [`InstrumentationSession`] holds one restorer per installed wrapper and
//! puts the pre-instrumentation originals back when restored or dropped.
//! Anything user code stored into a slot in the meantime is discarded.

use std::rc::Rc;

use crate::error::ScriptError;
use crate::host::{
    ConsoleHost, DomError, DomHost, HostContext, LocalBoxFuture, LogLevel, NetworkError,
    NetworkHost, NodeId, Request, Response, Slot, TimerHost, TimerId,
};
use crate::tracker::{AsyncKind, NetworkKind, SharedTracker};

type Restorer = Box<dyn FnOnce(&HostContext) -> bool>;

/// Installed wrappers for one run.
pub struct InstrumentationSession {
    host: Rc<HostContext>,
    restorers: Vec<(&'static str, Restorer)>,
    installed: Vec<&'static str>,
}

impl InstrumentationSession {
    /// Names of the slots that were wrapped.
    pub fn installed(&self) -> &[&'static str] {
        &self.installed
    }

    pub fn is_restored(&self) -> bool {
        self.restorers.is_empty()
    }

    /// Restores every original. Safe to call more than once.
    ///
    /// A restorer that fails is logged and skipped; the others still run.
    /// Returns the number of slots restored by this call.
    pub fn restore(&mut self) -> usize {
        let mut restored = 0;
        for (name, restorer) in self.restorers.drain(..).rev() {
            if restorer(&self.host) {
                restored += 1;
            } else {
                log::warn!("Failed to restore host {}", name);
            }
        }
        if restored > 0 {
            log::debug!("Restored {} host primitives", restored);
        }
        restored
    }
}

impl Drop for InstrumentationSession {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Wraps every host primitive present in `host`.
pub fn instrument_runtime(
    host: &Rc<HostContext>,
    tracker: &SharedTracker,
) -> InstrumentationSession {
    let mut session = InstrumentationSession {
        host: host.clone(),
        restorers: Vec::new(),
        installed: Vec::new(),
    };

    let t = tracker.clone();
    install(&mut session, "console", |h| &h.console, move |inner| {
        Rc::new(InstrumentedConsole { inner, tracker: t }) as Rc<dyn ConsoleHost>
    });
    let t = tracker.clone();
    install(&mut session, "network", |h| &h.network, move |inner| {
        Rc::new(InstrumentedNetwork { inner, tracker: t }) as Rc<dyn NetworkHost>
    });
    let t = tracker.clone();
    install(&mut session, "dom", |h| &h.dom, move |inner| {
        Rc::new(InstrumentedDom { inner, tracker: t }) as Rc<dyn DomHost>
    });
    let t = tracker.clone();
    install(&mut session, "timers", |h| &h.timers, move |inner| {
        Rc::new(InstrumentedTimers { inner, tracker: t }) as Rc<dyn TimerHost>
    });

    log::debug!("Instrumented host primitives: {:?}", session.installed);
    session
}

fn install<T: ?Sized + 'static>(
    session: &mut InstrumentationSession,
    name: &'static str,
    slot: fn(&HostContext) -> &Slot<T>,
    wrap: impl FnOnce(Rc<T>) -> Rc<T>,
) {
    let Ok(mut occupant) = slot(&session.host).try_borrow_mut() else {
        log::warn!("Host {} is busy, leaving it uninstrumented", name);
        return;
    };
    let Some(original) = occupant.clone() else {
        return;
    };
    *occupant = Some(wrap(original.clone()));
    drop(occupant);

    session.installed.push(name);
    session.restorers.push((
        name,
        Box::new(move |host: &HostContext| match slot(host).try_borrow_mut() {
            Ok(mut occupant) => {
                *occupant = Some(original);
                true
            }
            Err(_) => false,
        }),
    ));
}

struct InstrumentedConsole {
    inner: Rc<dyn ConsoleHost>,
    tracker: SharedTracker,
}

impl ConsoleHost for InstrumentedConsole {
    fn write(&self, level: LogLevel, message: &str) {
        self.tracker.borrow_mut().record_log(level, message);
        self.inner.write(level, message);
    }
}

struct InstrumentedNetwork {
    inner: Rc<dyn NetworkHost>,
    tracker: SharedTracker,
}

impl InstrumentedNetwork {
    fn observe<'a>(
        &'a self,
        kind: NetworkKind,
        request: Request,
        send: impl FnOnce(Request) -> LocalBoxFuture<'a, Result<Response, NetworkError>>,
    ) -> LocalBoxFuture<'a, Result<Response, NetworkError>> {
        self.tracker
            .borrow_mut()
            .record_network_request(kind, &request.url);
        let pending = send(request);
        let tracker = self.tracker.clone();
        Box::pin(async move {
            let result = pending.await;
            if let Err(e) = &result {
                tracker
                    .borrow_mut()
                    .record_error(&ScriptError::type_error(e.to_string()));
            }
            result
        })
    }
}

impl NetworkHost for InstrumentedNetwork {
    fn fetch(&self, request: Request) -> LocalBoxFuture<'_, Result<Response, NetworkError>> {
        self.observe(NetworkKind::Fetch, request, |r| self.inner.fetch(r))
    }

    fn xhr_open(&self, method: &str, url: &str) {
        self.tracker.borrow_mut().record_xhr_open(method, url);
        self.inner.xhr_open(method, url);
    }

    fn xhr_send(&self, request: Request) -> LocalBoxFuture<'_, Result<Response, NetworkError>> {
        self.observe(NetworkKind::Xhr, request, |r| self.inner.xhr_send(r))
    }
}

struct InstrumentedDom {
    inner: Rc<dyn DomHost>,
    tracker: SharedTracker,
}

impl InstrumentedDom {
    fn mutation(&self, operation: &str) {
        self.tracker.borrow_mut().record_dom_mutation(operation);
    }
}

impl DomHost for InstrumentedDom {
    fn document_body(&self) -> NodeId {
        self.inner.document_body()
    }

    fn create_element(&self, tag: &str) -> NodeId {
        self.inner.create_element(tag)
    }

    fn set_text_content(&self, node: NodeId, text: &str) -> Result<(), DomError> {
        self.inner.set_text_content(node, text)
    }

    fn append_child(&self, parent: NodeId, child: NodeId) -> Result<NodeId, DomError> {
        self.mutation("appendChild");
        self.inner.append_child(parent, child)
    }

    fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<NodeId, DomError> {
        self.mutation("insertBefore");
        self.inner.insert_before(parent, child, reference)
    }

    fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<NodeId, DomError> {
        self.mutation("removeChild");
        self.inner.remove_child(parent, child)
    }

    fn replace_child(
        &self,
        parent: NodeId,
        new_child: NodeId,
        old_child: NodeId,
    ) -> Result<NodeId, DomError> {
        self.mutation("replaceChild");
        self.inner.replace_child(parent, new_child, old_child)
    }

    fn replace_children(&self, parent: NodeId, children: &[NodeId]) -> Result<(), DomError> {
        self.mutation("replaceChildren");
        self.inner.replace_children(parent, children)
    }
}

struct InstrumentedTimers {
    inner: Rc<dyn TimerHost>,
    tracker: SharedTracker,
}

impl TimerHost for InstrumentedTimers {
    fn set_timeout(&self, delay_ms: f64) -> TimerId {
        self.tracker.borrow_mut().record_async(AsyncKind::Timeout);
        self.inner.set_timeout(delay_ms)
    }

    fn set_interval(&self, delay_ms: f64) -> TimerId {
        self.tracker.borrow_mut().record_async(AsyncKind::Interval);
        self.inner.set_interval(delay_ms)
    }

    fn request_animation_frame(&self) -> TimerId {
        self.tracker.borrow_mut().record_async(AsyncKind::Raf);
        self.inner.request_animation_frame()
    }

    fn clear_timer(&self, id: TimerId) {
        self.inner.clear_timer(id)
    }

    fn queue_microtask(&self) {
        self.tracker.borrow_mut().record_async(AsyncKind::Promise);
        self.inner.queue_microtask()
    }
}
