use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) node_type: NodeType,
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) tag_name: String,
    pub(crate) attrs: HashMap<String, String>,
    /// Script elements created by the parser block; created ones are async
    /// until a caller clears the flag.
    pub(crate) force_async: bool,
    pub(crate) already_started: bool,
}

#[derive(Debug, Clone)]
pub struct Dom {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    pub fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    pub(crate) fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        let element = Element {
            tag_name: tag_name.to_ascii_lowercase(),
            attrs,
            force_async: false,
            already_started: false,
        };
        self.create_node(Some(parent), NodeType::Element(element))
    }

    pub(crate) fn create_detached_element(&mut self, tag_name: &str) -> NodeId {
        let element = Element {
            tag_name: tag_name.to_ascii_lowercase(),
            attrs: HashMap::new(),
            force_async: true,
            already_started: false,
        };
        self.create_node(None, NodeType::Element(element))
    }

    pub(crate) fn create_detached_text(&mut self, text: String) -> NodeId {
        self.create_node(None, NodeType::Text(text))
    }

    pub(crate) fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    pub(crate) fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes.get(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    pub fn is_tag(&self, node_id: NodeId, tag: &str) -> bool {
        self.tag_name(node_id)
            .is_some_and(|name| name.eq_ignore_ascii_case(tag))
    }

    pub fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes.get(node_id.0).and_then(|node| node.parent)
    }

    pub fn children(&self, node_id: NodeId) -> &[NodeId] {
        self.nodes
            .get(node_id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn attr(&self, node_id: NodeId, name: &str) -> Option<&str> {
        self.element(node_id)
            .and_then(|e| e.attrs.get(&name.to_ascii_lowercase()))
            .map(String::as_str)
    }

    pub fn has_attr(&self, node_id: NodeId, name: &str) -> bool {
        self.attr(node_id, name).is_some()
    }

    /// Attribute names in a stable order.
    pub fn attr_names(&self, node_id: NodeId) -> Vec<String> {
        let mut names = self
            .element(node_id)
            .map(|e| e.attrs.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn set_attr(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::ScriptRuntime("setAttribute target is not an element".into()))?;
        element
            .attrs
            .insert(name.to_ascii_lowercase(), value.to_string());
        Ok(())
    }

    pub fn remove_attr(&mut self, node_id: NodeId, name: &str) -> Result<()> {
        let element = self.element_mut(node_id).ok_or_else(|| {
            Error::ScriptRuntime("removeAttribute target is not an element".into())
        })?;
        element.attrs.remove(&name.to_ascii_lowercase());
        Ok(())
    }

    pub(crate) fn set_force_async(&mut self, node_id: NodeId, force_async: bool) {
        if let Some(element) = self.element_mut(node_id) {
            element.force_async = force_async;
        }
    }

    pub fn text_content(&self, node_id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node_id, &mut out);
        out
    }

    fn collect_text(&self, node_id: NodeId, out: &mut String) {
        match &self.nodes[node_id.0].node_type {
            NodeType::Text(text) => out.push_str(text),
            NodeType::Document | NodeType::Element(_) => {
                for child in &self.nodes[node_id.0].children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Replaces all children with a single text node, like `script.text = ..`.
    pub fn set_text_content(&mut self, node_id: NodeId, text: &str) -> Result<()> {
        if !self.can_have_children(node_id) {
            return Err(Error::ScriptRuntime("textContent target cannot have children".into()));
        }
        let old_children = std::mem::take(&mut self.nodes[node_id.0].children);
        for child in old_children {
            self.nodes[child.0].parent = None;
        }
        if !text.is_empty() {
            self.create_text(node_id, text.to_string());
        }
        Ok(())
    }

    pub(crate) fn can_have_children(&self, node_id: NodeId) -> bool {
        matches!(
            self.nodes.get(node_id.0).map(|n| &n.node_type),
            Some(NodeType::Document | NodeType::Element(_))
        )
    }

    pub(crate) fn is_valid_node(&self, node_id: NodeId) -> bool {
        node_id.0 < self.nodes.len()
    }

    pub fn is_connected(&self, node_id: NodeId) -> bool {
        let mut cursor = Some(node_id);
        while let Some(node) = cursor {
            if node == self.root {
                return true;
            }
            cursor = self.parent(node);
        }
        false
    }

    pub(crate) fn collect_elements_dfs(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        if matches!(self.nodes[node_id.0].node_type, NodeType::Element(_)) {
            out.push(node_id);
        }
        for child in &self.nodes[node_id.0].children {
            self.collect_elements_dfs(*child, out);
        }
    }

    /// Every connected element, in document order.
    pub fn all_element_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_elements_dfs(self.root, &mut out);
        out
    }

    pub fn elements_by_tag_name(&self, tag: &str) -> Vec<NodeId> {
        self.all_element_nodes()
            .into_iter()
            .filter(|node| tag == "*" || self.is_tag(*node, tag))
            .collect()
    }

    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        if id.is_empty() {
            return None;
        }
        self.all_element_nodes()
            .into_iter()
            .find(|node| self.attr(*node, "id") == Some(id))
    }

    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root)
            .iter()
            .copied()
            .find(|node| self.element(*node).is_some())
    }

    pub fn head(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.children(html)
            .iter()
            .copied()
            .find(|node| self.is_tag(*node, "head"))
    }

    pub fn body(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.children(html)
            .iter()
            .copied()
            .find(|node| self.is_tag(*node, "body"))
    }

    /// Makes sure `<html>`, `<head>` and `<body>` exist, moving stray
    /// top-level content into the body.
    pub(crate) fn ensure_document_skeleton(&mut self) -> Result<NodeId> {
        let html = match self.document_element() {
            Some(html) if self.is_tag(html, "html") => html,
            _ => {
                let root_children = self.nodes[self.root.0].children.clone();
                let html = self.create_element(self.root, "html".to_string(), HashMap::new());
                for child in root_children {
                    self.append_child(html, child)?;
                }
                html
            }
        };

        let head = match self.head() {
            Some(head) => head,
            None => {
                let head = self.create_detached_element("head");
                self.prepend_child(html, head)?;
                head
            }
        };

        if let Some(body) = self.body() {
            return Ok(body);
        }
        let body = self.create_element(html, "body".to_string(), HashMap::new());
        let html_children = self.nodes[html.0].children.clone();
        for child in html_children {
            if child == body || child == head {
                continue;
            }
            if self.is_tag(child, "head") {
                continue;
            }
            self.insert_before(body, child, None)?;
        }
        Ok(body)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let reference = self.nodes[parent.0].children.first().copied();
        self.insert_before(parent, child, reference)
    }

    /// Inserts `child` under `parent` before `reference`, or at the end when
    /// there is no reference.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        if !self.can_have_children(parent) {
            return Err(Error::ScriptRuntime(
                "insertBefore target cannot have children".into(),
            ));
        }
        if child == self.root || child == parent {
            return Err(Error::ScriptRuntime("invalid insertBefore node".into()));
        }
        if !self.is_valid_node(child) {
            return Err(Error::ScriptRuntime("insertBefore node is invalid".into()));
        }
        if let Some(reference) = reference {
            if self.parent(reference) != Some(parent) {
                return Err(Error::ScriptRuntime(
                    "insertBefore reference is not a direct child".into(),
                ));
            }
            if child == reference {
                return Ok(());
            }
        }

        // Prevent cycles: parent must not be inside child's subtree.
        let mut cursor = Some(parent);
        while let Some(node) = cursor {
            if node == child {
                return Err(Error::ScriptRuntime(
                    "insertBefore would create a cycle".into(),
                ));
            }
            cursor = self.parent(node);
        }

        if let Some(old_parent) = self.parent(child) {
            self.nodes[old_parent.0].children.retain(|id| *id != child);
        }

        let index = match reference {
            Some(reference) => self.nodes[parent.0]
                .children
                .iter()
                .position(|id| *id == reference)
                .ok_or_else(|| Error::ScriptRuntime("insertBefore reference is missing".into()))?,
            None => self.nodes[parent.0].children.len(),
        };

        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(index, child);
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.parent(child) != Some(parent) {
            return Err(Error::ScriptRuntime(
                "removeChild target is not a direct child".into(),
            ));
        }
        self.nodes[parent.0].children.retain(|id| *id != child);
        self.nodes[child.0].parent = None;
        Ok(())
    }

    pub fn remove_node(&mut self, node: NodeId) -> Result<()> {
        if node == self.root {
            return Err(Error::ScriptRuntime("cannot remove document root".into()));
        }
        let Some(parent) = self.parent(node) else {
            return Ok(());
        };
        self.remove_child(parent, node)
    }

    /// Moves every child of `container` in front of `reference`.
    pub(crate) fn move_children_before(&mut self, container: NodeId, reference: NodeId) -> Result<()> {
        let parent = self
            .parent(reference)
            .ok_or_else(|| Error::ScriptRuntime("insertion point is detached".into()))?;
        let children = self.nodes[container.0].children.clone();
        for child in children {
            self.insert_before(parent, child, Some(reference))?;
        }
        Ok(())
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let groups = selector::parse_selector_groups(selector)?;
        Ok(self
            .all_element_nodes()
            .into_iter()
            .filter(|node| groups.iter().any(|group| self.matches_compound(*node, group)))
            .collect())
    }

    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        Ok(self.query_selector_all(selector)?.into_iter().next())
    }

    /// First connected element carrying `name`, in document order.
    pub(crate) fn first_with_attr(&self, name: &str) -> Option<NodeId> {
        self.all_element_nodes()
            .into_iter()
            .find(|node| self.has_attr(*node, name))
    }

    pub fn outer_html(&self, node_id: NodeId) -> String {
        html::serialize_node(self, node_id)
    }

    pub fn inner_html(&self, node_id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(node_id) {
            out.push_str(&html::serialize_node(self, *child));
        }
        out
    }
}
