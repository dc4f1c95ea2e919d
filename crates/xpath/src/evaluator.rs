use crate::ast::{ArithOp, Axis, CompareOp, Expr, NameTest, NodeTest, PathExpr, PathStart, Step};
use crate::model::{NodeKind, XdmNode, sort_document_order};
use crate::parser::parse_xpath;
use crate::runtime::{CallCtx, DynamicContext, Error, ErrorCode, ExpandedName, StaticContext};
use crate::value::{Value, string_to_number};
use smallvec::SmallVec;

type AxisNodes<N> = SmallVec<[N; 8]>;

/// Context node, position and size for one evaluation.
#[derive(Debug, Clone)]
pub struct Focus<N> {
    pub node: Option<N>,
    pub position: usize,
    pub size: usize,
}

impl<N> Focus<N> {
    pub fn new(node: N) -> Self {
        Self { node: Some(node), position: 1, size: 1 }
    }

    pub fn at(node: N, position: usize, size: usize) -> Self {
        Self { node: Some(node), position, size }
    }

    pub fn none() -> Self {
        Self { node: None, position: 0, size: 0 }
    }
}

/// A compiled expression, reusable across documents and contexts.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    pub fn compile(source: &str) -> Result<Self, Error> {
        let expr = parse_xpath(source)?;
        tracing::trace!(expression = source, "compiled XPath expression");
        Ok(Self { source: source.to_string(), expr })
    }

    /// Wraps an already parsed expression, e.g. a predicate of a larger one.
    pub fn from_expr(source: impl Into<String>, expr: Expr) -> Self {
        Self { source: source.into(), expr }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluates with the dynamic context's item as focus.
    pub fn evaluate<N: XdmNode>(
        &self,
        static_ctx: &StaticContext<N>,
        dyn_ctx: &DynamicContext<N>,
    ) -> Result<Value<N>, Error> {
        let focus = match dyn_ctx.context_item() {
            Some(node) => Focus::new(node.clone()),
            None => Focus::none(),
        };
        self.evaluate_with_focus(static_ctx, dyn_ctx, &focus)
    }

    pub fn evaluate_with_focus<N: XdmNode>(
        &self,
        static_ctx: &StaticContext<N>,
        dyn_ctx: &DynamicContext<N>,
        focus: &Focus<N>,
    ) -> Result<Value<N>, Error> {
        Evaluator { static_ctx, dyn_ctx }.eval(&self.expr, focus)
    }

    /// Evaluates and requires a node-set result.
    pub fn select<N: XdmNode>(
        &self,
        static_ctx: &StaticContext<N>,
        dyn_ctx: &DynamicContext<N>,
    ) -> Result<Vec<N>, Error> {
        self.evaluate(static_ctx, dyn_ctx)?.into_nodes()
    }
}

/// Compiles and evaluates in one go.
pub fn evaluate<N: XdmNode>(
    source: &str,
    static_ctx: &StaticContext<N>,
    dyn_ctx: &DynamicContext<N>,
) -> Result<Value<N>, Error> {
    XPath::compile(source)?.evaluate(static_ctx, dyn_ctx)
}

/// A node test with its names resolved against the static context.
enum ResolvedTest {
    AnyName,
    InNamespace(String),
    Name(ExpandedName),
    Node,
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
}

struct Evaluator<'c, N> {
    static_ctx: &'c StaticContext<N>,
    dyn_ctx: &'c DynamicContext<N>,
}

impl<N: XdmNode> Evaluator<'_, N> {
    fn eval(&self, expr: &Expr, focus: &Focus<N>) -> Result<Value<N>, Error> {
        match expr {
            Expr::Literal(text) => Ok(Value::String(text.clone())),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Variable(name) => {
                let expanded = self.static_ctx.expand(name)?;
                self.dyn_ctx.variable(&expanded).cloned().ok_or_else(|| {
                    Error::new(ErrorCode::UnknownVariable, format!("variable ${name} is not bound"))
                })
            }
            Expr::FunctionCall { name, args } => {
                let expanded = self.static_ctx.expand(name)?;
                let func = self.static_ctx.functions().resolve(&expanded, args.len())?;
                let values = args.iter().map(|arg| self.eval(arg, focus)).collect::<Result<Vec<_>, _>>()?;
                let call = CallCtx {
                    static_ctx: self.static_ctx,
                    dyn_ctx: self.dyn_ctx,
                    context_node: focus.node.clone(),
                    position: focus.position,
                    size: focus.size,
                };
                func(&call, &values)
            }
            Expr::Or(left, right) => Ok(Value::Boolean(
                self.eval(left, focus)?.to_boolean() || self.eval(right, focus)?.to_boolean(),
            )),
            Expr::And(left, right) => Ok(Value::Boolean(
                self.eval(left, focus)?.to_boolean() && self.eval(right, focus)?.to_boolean(),
            )),
            Expr::Compare { op, left, right } => {
                let left = self.eval(left, focus)?;
                let right = self.eval(right, focus)?;
                Ok(Value::Boolean(compare_values(*op, &left, &right)))
            }
            Expr::Arith { op, left, right } => {
                let l = self.eval(left, focus)?.to_number();
                let r = self.eval(right, focus)?.to_number();
                Ok(Value::Number(match op {
                    ArithOp::Add => l + r,
                    ArithOp::Sub => l - r,
                    ArithOp::Mul => l * r,
                    ArithOp::Div => l / r,
                    ArithOp::Mod => l % r,
                }))
            }
            Expr::Negate(inner) => Ok(Value::Number(-self.eval(inner, focus)?.to_number())),
            Expr::Union(left, right) => {
                let mut nodes = self.eval(left, focus)?.into_nodes()?;
                nodes.extend(self.eval(right, focus)?.into_nodes()?);
                sort_document_order(&mut nodes);
                Ok(Value::NodeSet(nodes))
            }
            Expr::Filter { primary, predicates } => {
                let mut nodes = self.eval(primary, focus)?.into_nodes()?;
                for predicate in predicates {
                    nodes = self.filter(nodes, predicate)?;
                }
                Ok(Value::NodeSet(nodes))
            }
            Expr::Path(path) => self.eval_path(path, focus).map(Value::NodeSet),
        }
    }

    fn context_node(focus: &Focus<N>) -> Result<N, Error> {
        focus
            .node
            .clone()
            .ok_or_else(|| Error::new(ErrorCode::NoContext, "path expression needs a context node"))
    }

    fn eval_path(&self, path: &PathExpr, focus: &Focus<N>) -> Result<Vec<N>, Error> {
        let mut current = match &path.start {
            PathStart::Root => vec![Self::context_node(focus)?.root()],
            PathStart::Context => vec![Self::context_node(focus)?],
            PathStart::Expr(expr) => self.eval(expr, focus)?.into_nodes()?,
        };
        for step in &path.steps {
            current = self.eval_step(&current, step)?;
        }
        Ok(current)
    }

    fn eval_step(&self, input: &[N], step: &Step) -> Result<Vec<N>, Error> {
        let test = self.resolve_test(&step.test)?;
        let principal = match step.axis {
            Axis::Attribute => NodeKind::Attribute,
            _ => NodeKind::Element,
        };
        let mut out = Vec::new();
        for node in input {
            let mut selected: Vec<N> = axis_nodes(node, step.axis)
                .into_iter()
                .filter(|candidate| matches_test(candidate, &test, principal))
                .collect();
            for predicate in &step.predicates {
                selected = self.filter(selected, predicate)?;
            }
            out.extend(selected);
        }
        sort_document_order(&mut out);
        Ok(out)
    }

    /// Keeps the nodes for which the predicate holds; numbers compare against the position.
    #[allow(clippy::cast_precision_loss)]
    fn filter(&self, nodes: Vec<N>, predicate: &Expr) -> Result<Vec<N>, Error> {
        let size = nodes.len();
        let mut kept = Vec::with_capacity(size);
        for (index, node) in nodes.into_iter().enumerate() {
            let position = index + 1;
            let focus = Focus::at(node, position, size);
            let keep = match self.eval(predicate, &focus)? {
                Value::Number(n) => (n - position as f64).abs() < f64::EPSILON,
                other => other.to_boolean(),
            };
            if keep && let Some(node) = focus.node {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    fn resolve_test(&self, test: &NodeTest) -> Result<ResolvedTest, Error> {
        Ok(match test {
            NodeTest::Name(NameTest::Any) => ResolvedTest::AnyName,
            NodeTest::Name(NameTest::AnyInNamespace(prefix)) => {
                ResolvedTest::InNamespace(self.static_ctx.resolve_prefix(prefix)?.to_string())
            }
            NodeTest::Name(NameTest::Name(name)) => ResolvedTest::Name(self.static_ctx.expand(name)?),
            NodeTest::Node => ResolvedTest::Node,
            NodeTest::Text => ResolvedTest::Text,
            NodeTest::Comment => ResolvedTest::Comment,
            NodeTest::ProcessingInstruction(target) => ResolvedTest::ProcessingInstruction(target.clone()),
        })
    }
}

fn matches_test<N: XdmNode>(node: &N, test: &ResolvedTest, principal: NodeKind) -> bool {
    match test {
        ResolvedTest::AnyName => node.kind() == principal,
        ResolvedTest::InNamespace(uri) => {
            node.kind() == principal && node.namespace_uri().as_deref() == Some(uri.as_str())
        }
        ResolvedTest::Name(name) => {
            node.kind() == principal && node.has_name(&name.local, name.ns_uri.as_deref())
        }
        ResolvedTest::Node => true,
        ResolvedTest::Text => node.kind().is_text(),
        ResolvedTest::Comment => node.kind() == NodeKind::Comment,
        ResolvedTest::ProcessingInstruction(target) => {
            node.kind() == NodeKind::ProcessingInstruction
                && target.as_ref().is_none_or(|t| node.name().is_some_and(|q| &q.local == t))
        }
    }
}

fn with_descendants<N: XdmNode>(node: N, out: &mut AxisNodes<N>) {
    let descendants = node.descendants();
    out.push(node);
    out.extend(descendants);
}

/// Nodes along `axis` in axis order: reverse axes start with the nearest node.
fn axis_nodes<N: XdmNode>(node: &N, axis: Axis) -> AxisNodes<N> {
    let is_attribute = node.kind() == NodeKind::Attribute;
    let mut out = AxisNodes::new();
    match axis {
        Axis::Child => out.extend(node.children()),
        Axis::Attribute => {
            if node.kind() == NodeKind::Element {
                out.extend(node.attributes());
            }
        }
        Axis::Descendant => out.extend(node.descendants()),
        Axis::DescendantOrSelf => with_descendants(node.clone(), &mut out),
        Axis::SelfAxis => out.push(node.clone()),
        Axis::Parent => out.extend(node.parent()),
        Axis::Ancestor | Axis::AncestorOrSelf => {
            if axis == Axis::AncestorOrSelf {
                out.push(node.clone());
            }
            let mut current = node.parent();
            while let Some(ancestor) = current {
                current = ancestor.parent();
                out.push(ancestor);
            }
        }
        Axis::FollowingSibling if !is_attribute => out.extend(node.following_siblings()),
        Axis::PrecedingSibling if !is_attribute => {
            out.extend(node.preceding_siblings().into_iter().rev());
        }
        Axis::FollowingSibling | Axis::PrecedingSibling | Axis::Namespace => {}
        Axis::Following => {
            let mut base = node.clone();
            if is_attribute && let Some(owner) = node.parent() {
                out.extend(owner.descendants());
                base = owner;
            }
            let mut current = Some(base);
            while let Some(n) = current {
                for sibling in n.following_siblings() {
                    with_descendants(sibling, &mut out);
                }
                current = n.parent();
            }
        }
        Axis::Preceding => {
            let base = if is_attribute { node.parent() } else { Some(node.clone()) };
            let mut collected = Vec::new();
            let mut current = base;
            while let Some(n) = current {
                for sibling in n.preceding_siblings() {
                    collected.push(sibling.clone());
                    collected.extend(sibling.descendants());
                }
                current = n.parent();
            }
            sort_document_order(&mut collected);
            out.extend(collected.into_iter().rev());
        }
    }
    out
}

#[derive(Clone, Copy)]
enum Atom<'a> {
    Boolean(bool),
    Number(f64),
    String(&'a str),
}

fn compare_numbers(op: CompareOp, l: f64, r: f64) -> bool {
    match op {
        CompareOp::Eq => l == r,
        CompareOp::Ne => l != r,
        CompareOp::Lt => l < r,
        CompareOp::Le => l <= r,
        CompareOp::Gt => l > r,
        CompareOp::Ge => l >= r,
    }
}

fn atom_number(atom: Atom<'_>) -> f64 {
    match atom {
        Atom::Boolean(b) => f64::from(u8::from(b)),
        Atom::Number(n) => n,
        Atom::String(s) => string_to_number(s),
    }
}

fn compare_atoms(op: CompareOp, left: Atom<'_>, right: Atom<'_>) -> bool {
    match op {
        CompareOp::Eq | CompareOp::Ne => {
            let equal = match (left, right) {
                (Atom::Boolean(l), other) | (other, Atom::Boolean(l)) => {
                    let r = match other {
                        Atom::Boolean(b) => b,
                        Atom::Number(n) => n != 0.0 && !n.is_nan(),
                        Atom::String(s) => !s.is_empty(),
                    };
                    l == r
                }
                (Atom::Number(_), _) | (_, Atom::Number(_)) => {
                    atom_number(left) == atom_number(right)
                }
                (Atom::String(l), Atom::String(r)) => l == r,
            };
            if op == CompareOp::Eq { equal } else { !equal }
        }
        _ => compare_numbers(op, atom_number(left), atom_number(right)),
    }
}

fn compare_node_set<N: XdmNode>(op: CompareOp, nodes: &[N], other: &Value<N>) -> bool {
    match other {
        Value::NodeSet(others) => {
            let right: Vec<String> = others.iter().map(XdmNode::string_value).collect();
            nodes.iter().any(|node| {
                let left = node.string_value();
                right.iter().any(|r| compare_atoms(op, Atom::String(&left), Atom::String(r)))
            })
        }
        Value::Boolean(b) => compare_atoms(op, Atom::Boolean(!nodes.is_empty()), Atom::Boolean(*b)),
        Value::Number(n) => nodes.iter().any(|node| {
            compare_numbers(op, string_to_number(&node.string_value()), *n)
        }),
        Value::String(s) => nodes.iter().any(|node| {
            compare_atoms(op, Atom::String(&node.string_value()), Atom::String(s))
        }),
    }
}

fn as_atom<N>(value: &Value<N>) -> Option<Atom<'_>> {
    match value {
        Value::NodeSet(_) => None,
        Value::Boolean(b) => Some(Atom::Boolean(*b)),
        Value::Number(n) => Some(Atom::Number(*n)),
        Value::String(s) => Some(Atom::String(s)),
    }
}

/// XPath 1.0 comparison, existential over node-sets.
pub fn compare_values<N: XdmNode>(op: CompareOp, left: &Value<N>, right: &Value<N>) -> bool {
    match (left, right) {
        (Value::NodeSet(nodes), other) => compare_node_set(op, nodes, other),
        (other, Value::NodeSet(nodes)) => compare_node_set(op.flipped(), nodes, other),
        _ => match (as_atom(left), as_atom(right)) {
            (Some(l), Some(r)) => compare_atoms(op, l, r),
            _ => false,
        },
    }
}
