//! Copying nodes between documents at path-expression selected places.
//!
//! A node belongs to the arena of exactly one [`Document`], so every merge is
//! a deep copy. With one destination match the source matches are appended
//! to it. With several destination matches each source node's sibling run is
//! replicated into every destination.

use crate::context::DocumentContext;
use crate::query::QueryResult;
use crate::state::{OperationState, Reason};
use core::fmt;
use xmlctx_dom::{Document, NodeId, NodeKind, NodeRef, TreeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FanOut {
    One,
    Each,
}

/// Copies the source matches into the destination matches.
///
/// One destination match behaves like [`merge_into_one`], several like
/// [`merge_into_each`]. No destination match changes nothing.
pub fn merge(
    src: &mut DocumentContext,
    src_expr: &str,
    dst: &mut DocumentContext,
    dst_expr: &str,
) -> OperationState {
    merge_with(src, src_expr, dst, dst_expr, None)
}

/// Appends a deep copy of every source match as the last child of the first
/// destination match.
pub fn merge_into_one(
    src: &mut DocumentContext,
    src_expr: &str,
    dst: &mut DocumentContext,
    dst_expr: &str,
) -> OperationState {
    merge_with(src, src_expr, dst, dst_expr, Some(FanOut::One))
}

/// Appends a deep copy of each source match and its following siblings to
/// every destination match.
pub fn merge_into_each(
    src: &mut DocumentContext,
    src_expr: &str,
    dst: &mut DocumentContext,
    dst_expr: &str,
) -> OperationState {
    merge_with(src, src_expr, dst, dst_expr, Some(FanOut::Each))
}

pub fn merge_fmt(
    src: &mut DocumentContext,
    src_args: fmt::Arguments<'_>,
    dst: &mut DocumentContext,
    dst_args: fmt::Arguments<'_>,
) -> OperationState {
    merge(src, &src_args.to_string(), dst, &dst_args.to_string())
}

fn merge_with(
    src: &mut DocumentContext,
    src_expr: &str,
    dst: &mut DocumentContext,
    dst_expr: &str,
    fan_out: Option<FanOut>,
) -> OperationState {
    // The returned state is the one of the side that failed.
    if !src.check_document() {
        return src.state();
    }
    if !dst.check_document() {
        return dst.state();
    }
    if !src.check_expression(src_expr) {
        return src.state();
    }
    if !dst.check_expression(dst_expr) {
        return dst.state();
    }
    let Some(sources) = src.select(src_expr) else {
        return src.state();
    };
    if !sources.has_result() {
        tracing::debug!(expression = src_expr, "merge source is empty");
        return dst.state();
    }
    let Some(targets) = dst.select(dst_expr) else {
        return dst.state();
    };
    let targets = targets.nodes();
    let fan_out = match (fan_out, targets.len()) {
        (_, 0) => {
            tracing::debug!(expression = dst_expr, "merge destination is empty");
            return dst.state();
        }
        (Some(fan_out), _) => fan_out,
        (None, 1) => FanOut::One,
        (None, _) => FanOut::Each,
    };
    let (Some(src_doc), Some(dst_doc)) = (src.document(), dst.document_mut()) else {
        return dst.state();
    };
    let mut last = OperationState::success(Reason::MergeResult);
    match fan_out {
        FanOut::One => {
            let target = targets[0];
            for &node in sources.nodes() {
                last = record(place(dst_doc, src_doc, node, target), node, target);
            }
        }
        FanOut::Each => {
            for &node in sources.nodes() {
                let run = src_doc.sibling_run(node);
                for &target in targets {
                    for &member in &run {
                        last = record(place(dst_doc, src_doc, member, target), member, target);
                    }
                }
            }
        }
    }
    tracing::debug!(
        sources = sources.node_count(),
        targets = targets.len(),
        ?fan_out,
        state = %last,
        "merged nodes"
    );
    dst.set_state(last)
}

/// Copies `node`, from any document, into every destination match.
pub fn merge_node(node: NodeRef<'_>, dst: &mut DocumentContext, dst_expr: &str) -> OperationState {
    let Some(targets) = dst.select(dst_expr) else {
        return dst.state();
    };
    merge_node_into(node, dst, targets.nodes())
}

pub fn merge_node_fmt(
    node: NodeRef<'_>,
    dst: &mut DocumentContext,
    dst_args: fmt::Arguments<'_>,
) -> OperationState {
    merge_node(node, dst, &dst_args.to_string())
}

/// Copies `node` into every node of an earlier result of `dst`.
pub fn merge_node_into_result(
    node: NodeRef<'_>,
    dst: &mut DocumentContext,
    targets: &QueryResult,
) -> OperationState {
    if !dst.check_document() {
        return dst.state();
    }
    merge_node_into(node, dst, targets.nodes())
}

fn merge_node_into(
    node: NodeRef<'_>,
    dst: &mut DocumentContext,
    targets: &[NodeId],
) -> OperationState {
    let Some(dst_doc) = dst.document_mut() else {
        return dst.state();
    };
    let mut last = None;
    for &target in targets {
        last = Some(record(place(dst_doc, node.document(), node.id(), target), node.id(), target));
    }
    match last {
        Some(state) => dst.set_state(state),
        None => dst.state(),
    }
}

fn record(outcome: Result<(), TreeError>, node: NodeId, target: NodeId) -> OperationState {
    match outcome {
        Ok(()) => OperationState::success(Reason::MergeResult),
        Err(error) => {
            tracing::warn!(%node, %target, %error, "merge placement failed");
            OperationState::error(Reason::MergeResult)
        }
    }
}

/// Places a deep copy of `node` from `source` under `target`.
///
/// Attributes are set on element targets; every other node kind is appended
/// as the last child.
fn place(
    dst: &mut Document,
    source: &Document,
    node: NodeId,
    target: NodeId,
) -> Result<(), TreeError> {
    match source.kind(node).ok_or(TreeError::UnknownNode(node))? {
        NodeKind::Document => Err(TreeError::NotCopyable(node)),
        NodeKind::Attribute => {
            if dst.kind(target) != Some(NodeKind::Element) {
                return Err(TreeError::InvalidPlacement { parent: target, child: node });
            }
            let name = source.name(node).cloned().ok_or(TreeError::UnknownNode(node))?;
            if let (Some(prefix), Some(uri)) = (&name.prefix, &name.ns_uri)
                && dst.lookup_namespace(target, Some(prefix.as_str())).as_deref() != Some(uri.as_str())
            {
                dst.declare_namespace(target, Some(prefix.as_str()), uri)?;
            }
            dst.set_attribute(target, name, source.value(node)).map(|_| ())
        }
        _ => {
            let copy = dst.import_node(source, node)?;
            dst.append_child(target, copy).inspect_err(|_| {
                // Drop the unplaced copy.
                let _ = dst.remove(copy);
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn context(xml: &str) -> DocumentContext {
        DocumentContext::from(xmlctx_dom::parse(xml).unwrap())
    }

    #[rstest]
    fn attribute_sources_become_attributes() {
        let mut src = context(r#"<a xmlns:g="urn:game" g:rank="3"/>"#);
        let mut dst = context("<heros><hero/></heros>");
        let state = merge(&mut src, "/a/@*", &mut dst, "//hero");
        assert_eq!(state, OperationState::success(Reason::MergeResult));
        let hero = dst.evaluate("//hero").unwrap().nodes()[0];
        let doc = dst.document().unwrap();
        assert_eq!(doc.attribute(hero, "g:rank"), Some("3"));
        assert_eq!(doc.lookup_namespace(hero, Some("g")).as_deref(), Some("urn:game"));
    }

    #[rstest]
    fn invalid_placement_is_a_merge_error() {
        let mut src = context("<a><b/></a>");
        let mut dst = context("<heros age=\"1\"/>");
        let state = merge(&mut src, "//b", &mut dst, "/heros/@age");
        assert_eq!(state, OperationState::error(Reason::MergeResult));
        assert_eq!(dst.evaluate("count(//b)"), Some(QueryResult::Number(0.0)));
    }

    #[rstest]
    fn document_destination_takes_a_root_only_once() {
        let mut src = context("<heros/>");
        let mut empty = DocumentContext::new_empty();
        assert!(merge(&mut src, "/heros", &mut empty, "/").is_success());
        assert!(merge(&mut src, "/heros", &mut empty, "/").is_error());
    }

    #[rstest]
    fn validation_stops_at_first_failure() {
        let mut src = DocumentContext::new(None);
        let mut dst = context("<a/>");
        let state = merge(&mut src, "//x", &mut dst, "/a");
        assert_eq!(src.state(), OperationState::error(Reason::SourceInvalid));
        assert_eq!(state, OperationState::error(Reason::SourceInvalid));

        let mut src = context("<a/>");
        let state = merge(&mut src, "//x[", &mut dst, "/a");
        assert_eq!(src.state(), OperationState::error(Reason::PathInvalid));
        assert_eq!(state, OperationState::error(Reason::PathInvalid));
        assert!(!dst.state().is_error());
    }

    #[rstest]
    #[case(FanOut::One)]
    #[case(FanOut::Each)]
    fn malformed_source_expression_is_returned_as_error(#[case] fan_out: FanOut) {
        let mut src = context("<a><b/></a>");
        let mut dst = context("<x/>");
        let state = match fan_out {
            FanOut::One => merge_into_one(&mut src, "//a[", &mut dst, "/x"),
            FanOut::Each => merge_into_each(&mut src, "//a[", &mut dst, "/x"),
        };
        assert!(state.is_error());
        assert_eq!(state.reason, Reason::PathInvalid);
        assert_eq!(dst.to_xml_string().unwrap().matches("<b").count(), 0);
    }
}
