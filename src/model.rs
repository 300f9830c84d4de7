//! In-memory form schema, consumed read-only by the export core.
//!
//! The tree is arena-backed: nodes live in a flat vector and refer to each
//! other by index, so the back reference from a node to its nearest enclosing
//! repeat is a plain index rather than an owning link.

/// Index of a node inside its [`FormModel`] arena.
pub type NodeId = usize;

/// Primitive data type of a field, as declared by the form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    Text,
    Int,
    Decimal,
    Boolean,
    Date,
    Time,
    DateTime,
    Geopoint,
    Geotrace,
    Geoshape,
    Binary,
    SelectOne,
    SelectMultiple,
}

impl DataType {
    /// Maps an XForms bind type to a data type; unknown types fall back to
    /// text.
    pub fn from_bind(raw: &str) -> Self {
        let local = raw.rsplit_once(':').map_or(raw, |(_, local)| local);
        match local {
            "int" | "integer" => Self::Int,
            "decimal" => Self::Decimal,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "time" => Self::Time,
            "dateTime" => Self::DateTime,
            "geopoint" => Self::Geopoint,
            "geotrace" => Self::Geotrace,
            "geoshape" => Self::Geoshape,
            "binary" => Self::Binary,
            "select1" => Self::SelectOne,
            "select" => Self::SelectMultiple,
            _ => Self::Text,
        }
    }
}

/// Structural role of a schema node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Repeat,
    Field(DataType),
}

/// One node of the schema tree.
#[derive(Debug, Clone)]
pub struct ModelNode {
    /// Local element name.
    pub name: String,

    /// Canonical slash-joined path, including the root element name.
    path: String,

    pub kind: NodeKind,

    children: Vec<NodeId>,

    /// Nearest enclosing repeat; `None` when the root is the closest
    /// repeatable scope.
    pub parent_repeat: Option<NodeId>,
}

/// Arena-backed schema tree; child order mirrors the form declaration.
#[derive(Debug, Clone)]
pub struct FormModel {
    nodes: Vec<ModelNode>,
}

impl FormModel {
    #[inline]
    pub fn root(&self) -> NodeId {
        0
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &ModelNode {
        &self.nodes[id]
    }

    /// Direct children of a node, in declaration order.
    #[inline]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// Canonical slash-joined path of a node.
    #[inline]
    pub fn fqn(&self, id: NodeId) -> &str {
        &self.nodes[id].path
    }

    /// Every repeat node, depth-first pre-order.
    pub fn repeatable_fields(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_repeats(self.root(), &mut out);
        out
    }

    fn collect_repeats(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &child in self.children(id) {
            if matches!(self.nodes[child].kind, NodeKind::Repeat) {
                out.push(child);
            }
            self.collect_repeats(child, out);
        }
    }
}

/// Construction API used by the form loader and by tests.
///
/// The built model is immutable; the export core only reads it.
pub struct ModelBuilder {
    nodes: Vec<ModelNode>,
}

impl ModelBuilder {
    pub fn new(root_name: &str) -> Self {
        Self {
            nodes: vec![ModelNode {
                name: root_name.to_string(),
                path: root_name.to_string(),
                kind: NodeKind::Group,
                children: Vec::new(),
                parent_repeat: None,
            }],
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        0
    }

    pub fn group(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.add(parent, name, NodeKind::Group)
    }

    pub fn repeat(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.add(parent, name, NodeKind::Repeat)
    }

    pub fn field(&mut self, parent: NodeId, name: &str, data_type: DataType) -> NodeId {
        self.add(parent, name, NodeKind::Field(data_type))
    }

    fn add(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        let path = format!("{}/{name}", self.nodes[parent].path);
        let parent_repeat = match self.nodes[parent].kind {
            NodeKind::Repeat => Some(parent),
            _ => self.nodes[parent].parent_repeat,
        };
        self.nodes.push(ModelNode {
            name: name.to_string(),
            path,
            kind,
            children: Vec::new(),
            parent_repeat,
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn finish(self) -> FormModel {
        FormModel { nodes: self.nodes }
    }
}

/// A loaded form: identity plus its schema tree.
#[derive(Debug, Clone)]
pub struct FormDefinition {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
    pub encrypted: bool,
    pub model: FormModel,
}
