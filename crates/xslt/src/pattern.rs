//! Template match patterns.
//!
//! A node matches a pattern alternative when evaluating the alternative with
//! one of the node's ancestors as context selects the node. Absolute
//! alternatives are evaluated once from the root.

use crate::error::StylesheetError;
use xmlctx_dom::{NodeKind, NodeRef};
use xmlctx_xpath::ast::{Axis, Expr, NameTest, NodeTest, PathExpr, PathStart, Step};
use xmlctx_xpath::{DynamicContext, Error, Focus, StaticContext, XPath, XdmNode, parse_xpath};

/// One `|` branch of a pattern.
#[derive(Debug, Clone)]
pub struct Alternative {
    xpath: XPath,
    absolute: bool,
    last_step: Option<Step>,
    default_priority: f64,
}

impl Alternative {
    pub fn default_priority(&self) -> f64 {
        self.default_priority
    }

    pub fn matches<'a>(
        &self,
        node: NodeRef<'a>,
        static_ctx: &StaticContext<NodeRef<'a>>,
        dyn_ctx: &DynamicContext<NodeRef<'a>>,
    ) -> Result<bool, Error> {
        if !self.could_match(node) {
            return Ok(false);
        }
        if self.absolute {
            return self.selects(node, node.root(), static_ctx, dyn_ctx);
        }
        let mut context = node.parent();
        while let Some(candidate) = context {
            if self.selects(node, candidate, static_ctx, dyn_ctx)? {
                return Ok(true);
            }
            context = candidate.parent();
        }
        Ok(false)
    }

    fn selects<'a>(
        &self,
        node: NodeRef<'a>,
        context: NodeRef<'a>,
        static_ctx: &StaticContext<NodeRef<'a>>,
        dyn_ctx: &DynamicContext<NodeRef<'a>>,
    ) -> Result<bool, Error> {
        let value = self.xpath.evaluate_with_focus(static_ctx, dyn_ctx, &Focus::new(context))?;
        Ok(value.as_nodes().is_some_and(|nodes| nodes.contains(&node)))
    }

    /// Cheap rejection on the node kind and local name of the last step.
    fn could_match(&self, node: NodeRef<'_>) -> bool {
        let Some(step) = &self.last_step else {
            return true;
        };
        let kind = XdmNode::kind(&node);
        let principal = if step.axis == Axis::Attribute { NodeKind::Attribute } else { NodeKind::Element };
        match &step.test {
            NodeTest::Name(NameTest::Name(name)) => {
                kind == principal && node.name().is_some_and(|q| q.local == name.local)
            }
            NodeTest::Name(_) => kind == principal,
            NodeTest::Text => kind.is_text(),
            NodeTest::Comment => kind == NodeKind::Comment,
            NodeTest::ProcessingInstruction(_) => kind == NodeKind::ProcessingInstruction,
            NodeTest::Node => step.axis != Axis::Attribute || kind == NodeKind::Attribute,
        }
    }
}

/// A compiled `match` pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    alternatives: Vec<Alternative>,
}

impl Pattern {
    pub fn parse(source: &str) -> Result<Self, StylesheetError> {
        let invalid = |reason: String| StylesheetError::Pattern { pattern: source.to_string(), reason };
        let expr = parse_xpath(source).map_err(|err| invalid(err.to_string()))?;
        let alternatives = expr
            .union_branches()
            .into_iter()
            .map(|branch| compile_alternative(source, branch).map_err(invalid))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { source: source.to_string(), alternatives })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    pub fn matches<'a>(
        &self,
        node: NodeRef<'a>,
        static_ctx: &StaticContext<NodeRef<'a>>,
        dyn_ctx: &DynamicContext<NodeRef<'a>>,
    ) -> Result<bool, Error> {
        for alternative in &self.alternatives {
            if alternative.matches(node, static_ctx, dyn_ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn compile_alternative(source: &str, branch: &Expr) -> Result<Alternative, String> {
    let (absolute, steps) = match branch {
        Expr::Path(PathExpr { start, steps }) => {
            let absolute = match start {
                PathStart::Root => true,
                PathStart::Context => false,
                PathStart::Expr(primary) => {
                    check_id_or_key(primary)?;
                    true
                }
            };
            check_steps(steps)?;
            if !absolute && steps.is_empty() {
                return Err("empty location path".to_string());
            }
            (absolute, steps.as_slice())
        }
        Expr::FunctionCall { .. } => {
            check_id_or_key(branch)?;
            (true, &[] as &[Step])
        }
        _ => return Err("only location paths and id()/key() calls are allowed".to_string()),
    };
    Ok(Alternative {
        xpath: XPath::from_expr(source, branch.clone()),
        absolute,
        last_step: steps.last().cloned(),
        default_priority: default_priority(branch),
    })
}

fn check_id_or_key(expr: &Expr) -> Result<(), String> {
    match expr {
        Expr::FunctionCall { name, args }
            if name.prefix.is_none()
                && matches!(name.local.as_str(), "id" | "key")
                && args.iter().all(|arg| matches!(arg, Expr::Literal(_))) =>
        {
            Ok(())
        }
        _ => Err("a pattern may only start with id() or key() on literal arguments".to_string()),
    }
}

fn check_steps(steps: &[Step]) -> Result<(), String> {
    for (index, step) in steps.iter().enumerate() {
        match step.axis {
            Axis::Child | Axis::Attribute => {}
            // Only as the expansion of `//` between two steps.
            Axis::DescendantOrSelf
                if step.test == NodeTest::Node && step.predicates.is_empty() && index + 1 < steps.len() => {}
            axis => return Err(format!("the {axis:?} axis is not allowed in patterns")),
        }
    }
    Ok(())
}

/// XSLT 1.0 default priority of a single alternative.
fn default_priority(branch: &Expr) -> f64 {
    let Expr::Path(PathExpr { start: PathStart::Context, steps }) = branch else {
        return 0.5;
    };
    match steps.as_slice() {
        [step] if step.predicates.is_empty() => match &step.test {
            NodeTest::Name(NameTest::Name(_)) | NodeTest::ProcessingInstruction(Some(_)) => 0.0,
            NodeTest::Name(NameTest::AnyInNamespace(_)) => -0.25,
            _ => -0.5,
        },
        _ => 0.5,
    }
}
