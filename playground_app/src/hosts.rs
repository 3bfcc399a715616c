//! In-memory host implementations.
//!
//! These stand in for a real layout engine, console, network stack, DOM and
//! timer queue. The command line runner uses them, and so do the tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use playground_core::{
    FrameScheduler, LayoutHost, MeasureError, Rect, Selection, TextBuffer, Viewport,
};
use playground_runtime::{
    ConsoleHost, DomError, DomHost, LocalBoxFuture, LogLevel, NetworkError, NetworkHost, NodeId,
    Request, Response, TimerHost, TimerId,
};

/// Fixed-pitch layout without wrapping.
#[derive(Debug, Clone)]
pub struct MonospaceLayout {
    pub line_height: f32,
    pub char_width: f32,
    viewport: Viewport,
}

impl MonospaceLayout {
    pub fn new(line_height: f32, char_width: f32, width: f32, height: f32) -> Self {
        Self {
            line_height,
            char_width,
            viewport: Viewport {
                scroll_top: 0.0,
                scroll_left: 0.0,
                width,
                height,
            },
        }
    }
}

impl Default for MonospaceLayout {
    fn default() -> Self {
        Self::new(18.0, 8.0, 800.0, 600.0)
    }
}

impl LayoutHost for MonospaceLayout {
    fn measure_range(&self, start: usize, end: usize) -> Result<f32, MeasureError> {
        if end < start {
            return Err(MeasureError::OutOfRange { start, end });
        }
        Ok(self.line_height)
    }

    fn selection_rect(
        &self,
        buffer: &TextBuffer,
        selection: &Selection,
    ) -> Result<Option<Rect>, MeasureError> {
        let selection = selection.clamped(buffer.len_chars());
        let (line, col) = buffer.char_to_line_col(selection.cursor);
        Ok(Some(Rect::new(
            col as f32 * self.char_width,
            line as f32 * self.line_height,
            self.char_width,
            self.line_height,
        )))
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_scroll(&mut self, top: f32, left: f32) {
        self.viewport.scroll_top = top;
        self.viewport.scroll_left = left;
    }
}

/// Counts animation frame requests; the embedder calls back into the app
/// when [`FrameRequests::take`] reports one.
#[derive(Debug, Default)]
pub struct FrameRequests {
    pending: Cell<bool>,
    requested: Cell<u64>,
}

impl FrameRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears and returns the pending flag.
    pub fn take(&self) -> bool {
        self.pending.replace(false)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Total requests so far.
    pub fn requested(&self) -> u64 {
        self.requested.get()
    }
}

impl FrameScheduler for FrameRequests {
    fn request_frame(&self) {
        self.pending.set(true);
        self.requested.set(self.requested.get() + 1);
    }
}

/// Console that keeps every line.
#[derive(Debug, Default)]
pub struct MemoryConsole {
    lines: RefCell<Vec<(LogLevel, String)>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.borrow().clone()
    }

    pub fn clear(&self) {
        self.lines.borrow_mut().clear();
    }
}

impl ConsoleHost for MemoryConsole {
    fn write(&self, level: LogLevel, message: &str) {
        self.lines.borrow_mut().push((level, message.to_string()));
    }
}

/// Network with canned responses.
///
/// Unknown URLs answer 404. While offline every request fails.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    routes: RefCell<HashMap<String, Response>>,
    offline: Cell<bool>,
    requests: RefCell<Vec<Request>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` with status 200 for `url`.
    pub fn route(&self, url: impl Into<String>, body: impl Into<String>) {
        self.routes.borrow_mut().insert(url.into(), Response::ok(body));
    }

    pub fn route_response(&self, url: impl Into<String>, response: Response) {
        self.routes.borrow_mut().insert(url.into(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    fn answer(&self, request: Request) -> Result<Response, NetworkError> {
        self.requests.borrow_mut().push(request.clone());
        if self.offline.get() {
            return Err(NetworkError::Failed {
                url: request.url,
                reason: "network is offline".to_string(),
            });
        }
        let response = self.routes.borrow().get(&request.url).cloned().unwrap_or(Response {
            status: 404,
            body: String::new(),
        });
        Ok(response)
    }
}

impl NetworkHost for MemoryNetwork {
    fn fetch(&self, request: Request) -> LocalBoxFuture<'_, Result<Response, NetworkError>> {
        let outcome = self.answer(request);
        Box::pin(async move { outcome })
    }

    fn xhr_send(&self, request: Request) -> LocalBoxFuture<'_, Result<Response, NetworkError>> {
        self.fetch(request)
    }
}

#[derive(Debug, Clone, Default)]
struct DomNode {
    tag: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    text: String,
}

/// A small element tree rooted at `<body>`.
#[derive(Debug)]
pub struct MemoryDom {
    nodes: RefCell<Vec<DomNode>>,
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self {
            nodes: RefCell::new(vec![DomNode {
                tag: "body".to_string(),
                ..DomNode::default()
            }]),
        }
    }
}

impl MemoryDom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Children of `node` in document order.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .borrow()
            .get(node.0 as usize)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn tag(&self, node: NodeId) -> Option<String> {
        self.nodes.borrow().get(node.0 as usize).map(|n| n.tag.clone())
    }

    pub fn text(&self, node: NodeId) -> Option<String> {
        self.nodes.borrow().get(node.0 as usize).map(|n| n.text.clone())
    }

    fn check(nodes: &[DomNode], id: NodeId) -> Result<(), DomError> {
        if (id.0 as usize) < nodes.len() {
            Ok(())
        } else {
            Err(DomError::UnknownNode(id))
        }
    }

    /// Refuses to insert a node into itself or its own subtree.
    fn check_insertable(nodes: &[DomNode], parent: NodeId, child: NodeId) -> Result<(), DomError> {
        Self::check(nodes, parent)?;
        Self::check(nodes, child)?;
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(DomError::HierarchyRequest(child));
            }
            cursor = nodes[id.0 as usize].parent;
        }
        Ok(())
    }

    fn detach(nodes: &mut [DomNode], child: NodeId) {
        if let Some(old_parent) = nodes[child.0 as usize].parent.take() {
            nodes[old_parent.0 as usize].children.retain(|c| *c != child);
        }
    }

    fn insert_at(nodes: &mut [DomNode], parent: NodeId, child: NodeId, index: Option<usize>) {
        Self::detach(nodes, child);
        let siblings = &mut nodes[parent.0 as usize].children;
        match index {
            Some(index) => siblings.insert(index.min(siblings.len()), child),
            None => siblings.push(child),
        }
        nodes[child.0 as usize].parent = Some(parent);
    }

    fn position_of(nodes: &[DomNode], parent: NodeId, child: NodeId) -> Result<usize, DomError> {
        nodes[parent.0 as usize]
            .children
            .iter()
            .position(|c| *c == child)
            .ok_or(DomError::NotAChild { parent, child })
    }
}

impl DomHost for MemoryDom {
    fn document_body(&self) -> NodeId {
        NodeId(0)
    }

    fn create_element(&self, tag: &str) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(DomNode {
            tag: tag.to_ascii_lowercase(),
            ..DomNode::default()
        });
        NodeId(nodes.len() as u64 - 1)
    }

    fn set_text_content(&self, node: NodeId, text: &str) -> Result<(), DomError> {
        let mut nodes = self.nodes.borrow_mut();
        Self::check(&nodes, node)?;
        for child in std::mem::take(&mut nodes[node.0 as usize].children) {
            nodes[child.0 as usize].parent = None;
        }
        nodes[node.0 as usize].text = text.to_string();
        Ok(())
    }

    fn append_child(&self, parent: NodeId, child: NodeId) -> Result<NodeId, DomError> {
        let mut nodes = self.nodes.borrow_mut();
        Self::check_insertable(&nodes, parent, child)?;
        Self::insert_at(&mut nodes, parent, child, None);
        Ok(child)
    }

    fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<NodeId, DomError> {
        let mut nodes = self.nodes.borrow_mut();
        Self::check_insertable(&nodes, parent, child)?;
        let Some(reference) = reference else {
            Self::insert_at(&mut nodes, parent, child, None);
            return Ok(child);
        };
        Self::check(&nodes, reference)?;
        Self::position_of(&nodes, parent, reference)?;
        if reference == child {
            return Ok(child);
        }
        Self::detach(&mut nodes, child);
        let index = Self::position_of(&nodes, parent, reference)?;
        Self::insert_at(&mut nodes, parent, child, Some(index));
        Ok(child)
    }

    fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<NodeId, DomError> {
        let mut nodes = self.nodes.borrow_mut();
        Self::check(&nodes, parent)?;
        Self::check(&nodes, child)?;
        Self::position_of(&nodes, parent, child)?;
        Self::detach(&mut nodes, child);
        Ok(child)
    }

    fn replace_child(
        &self,
        parent: NodeId,
        new_child: NodeId,
        old_child: NodeId,
    ) -> Result<NodeId, DomError> {
        let mut nodes = self.nodes.borrow_mut();
        Self::check_insertable(&nodes, parent, new_child)?;
        Self::check(&nodes, old_child)?;
        Self::position_of(&nodes, parent, old_child)?;
        if new_child == old_child {
            return Ok(old_child);
        }
        Self::detach(&mut nodes, new_child);
        let index = Self::position_of(&nodes, parent, old_child)?;
        Self::detach(&mut nodes, old_child);
        Self::insert_at(&mut nodes, parent, new_child, Some(index));
        Ok(old_child)
    }

    fn replace_children(&self, parent: NodeId, children: &[NodeId]) -> Result<(), DomError> {
        let mut nodes = self.nodes.borrow_mut();
        for child in children {
            Self::check_insertable(&nodes, parent, *child)?;
        }
        for old in std::mem::take(&mut nodes[parent.0 as usize].children) {
            nodes[old.0 as usize].parent = None;
        }
        for child in children {
            Self::insert_at(&mut nodes, parent, *child, None);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerKind {
    Timeout,
    Interval,
    AnimationFrame,
}

/// Registered timers, never fired on their own.
#[derive(Debug, Default)]
pub struct ManualTimers {
    next_id: Cell<u64>,
    timers: RefCell<BTreeMap<u64, (TimerKind, f64)>>,
    microtasks: Cell<u64>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timers still registered, by id.
    pub fn pending(&self) -> Vec<(TimerId, TimerKind, f64)> {
        self.timers
            .borrow()
            .iter()
            .map(|(id, (kind, delay))| (TimerId(*id), *kind, *delay))
            .collect()
    }

    pub fn microtasks(&self) -> u64 {
        self.microtasks.get()
    }

    fn register(&self, kind: TimerKind, delay_ms: f64) -> TimerId {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.timers.borrow_mut().insert(id, (kind, delay_ms));
        TimerId(id)
    }
}

impl TimerHost for ManualTimers {
    fn set_timeout(&self, delay_ms: f64) -> TimerId {
        self.register(TimerKind::Timeout, delay_ms)
    }

    fn set_interval(&self, delay_ms: f64) -> TimerId {
        self.register(TimerKind::Interval, delay_ms)
    }

    fn request_animation_frame(&self) -> TimerId {
        self.register(TimerKind::AnimationFrame, 0.0)
    }

    fn clear_timer(&self, id: TimerId) {
        self.timers.borrow_mut().remove(&id.0);
    }

    fn queue_microtask(&self) {
        self.microtasks.set(self.microtasks.get() + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dom_tree_operations() {
        let dom = MemoryDom::new();
        let body = dom.document_body();
        let a = dom.create_element("DIV");
        let b = dom.create_element("span");
        let c = dom.create_element("p");

        dom.append_child(body, a).unwrap();
        dom.append_child(body, c).unwrap();
        dom.insert_before(body, b, Some(c)).unwrap();
        assert_eq!(dom.children(body), vec![a, b, c]);
        assert_eq!(dom.tag(a).as_deref(), Some("div"));

        dom.replace_child(body, c, a).unwrap();
        assert_eq!(dom.children(body), vec![c, b]);

        dom.replace_children(body, &[b]).unwrap();
        assert_eq!(dom.children(body), vec![b]);
    }

    #[test]
    fn test_dom_errors() {
        let dom = MemoryDom::new();
        let body = dom.document_body();
        let a = dom.create_element("div");
        let b = dom.create_element("div");
        dom.append_child(body, a).unwrap();
        dom.append_child(a, b).unwrap();

        assert_eq!(dom.append_child(b, a), Err(DomError::HierarchyRequest(a)));
        assert_eq!(dom.remove_child(body, b), Err(DomError::NotAChild { parent: body, child: b }));
        assert_eq!(dom.append_child(body, NodeId(99)), Err(DomError::UnknownNode(NodeId(99))));
    }

    #[test]
    fn test_text_content_drops_children() {
        let dom = MemoryDom::new();
        let body = dom.document_body();
        let a = dom.create_element("div");
        dom.append_child(body, a).unwrap();
        dom.set_text_content(body, "hello").unwrap();
        assert!(dom.children(body).is_empty());
        assert_eq!(dom.text(body).as_deref(), Some("hello"));
    }

    #[test]
    fn test_timers_register_and_clear() {
        let timers = ManualTimers::new();
        let a = timers.set_timeout(10.0);
        let _b = timers.request_animation_frame();
        timers.clear_timer(a);
        let pending = timers.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1, TimerKind::AnimationFrame);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_network_routes_and_offline() {
        let network = MemoryNetwork::new();
        network.route("/a", "alpha");
        assert_eq!(network.fetch(Request::get("/a")).await.unwrap().body, "alpha");
        assert_eq!(network.fetch(Request::get("/b")).await.unwrap().status, 404);

        network.set_offline(true);
        assert!(network.fetch(Request::get("/a")).await.is_err());
        assert_eq!(network.requests().len(), 3);
    }

    #[test]
    fn test_monospace_caret_rect() {
        let layout = MonospaceLayout::default();
        let buffer = TextBuffer::from_str("ab\ncd");
        let rect = layout.selection_rect(&buffer, &Selection::new(4)).unwrap().unwrap();
        assert_eq!(rect, Rect::new(8.0, 18.0, 8.0, 18.0));
    }
}
