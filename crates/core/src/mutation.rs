//! Editing a document through path-expression matches.

use crate::context::DocumentContext;
use crate::query::{EvaluateOptions, QueryResult};
use crate::state::{OperationState, Reason};
use core::fmt;
use xmlctx_dom::{NodeId, NodeKind};

impl DocumentContext {
    /// Validates document and expression, then evaluates.
    ///
    /// Records `Error/SourceInvalid` or `Error/PathInvalid` on failure and
    /// `Success/NoReason` otherwise.
    pub(crate) fn select(&mut self, expr: &str) -> Option<QueryResult> {
        if !self.check_document() || !self.check_expression(expr) {
            return None;
        }
        match self.try_evaluate(expr, &EvaluateOptions::default()) {
            Ok(result) => Some(result),
            Err(error) => {
                tracing::debug!(expression = expr, %error, "path expression failed");
                self.set_state(OperationState::error(Reason::PathInvalid));
                None
            }
        }
    }

    /// True when `expr` selects at least one node.
    pub fn exists(&mut self, expr: &str) -> bool {
        self.select(expr).is_some_and(|result| result.has_result())
    }

    pub fn exists_fmt(&mut self, args: fmt::Arguments<'_>) -> bool {
        self.exists(&args.to_string())
    }

    /// Sets every matched attribute to `value`. Other node kinds are skipped.
    pub fn set_attribute(&mut self, expr: &str, value: &str) -> OperationState {
        let Some(result) = self.select(expr) else {
            return self.state();
        };
        let Some(document) = self.document_mut() else {
            return self.state();
        };
        let mut updated = 0usize;
        for &id in result.nodes() {
            if document.kind(id) != Some(NodeKind::Attribute) {
                continue;
            }
            let (Some(owner), Some(name)) = (document.parent(id), document.name(id).cloned()) else {
                continue;
            };
            match document.set_attribute(owner, name, value) {
                Ok(_) => updated += 1,
                Err(error) => tracing::warn!(node = %id, %error, "cannot set attribute"),
            }
        }
        tracing::debug!(expression = expr, updated, "set attribute values");
        self.state()
    }

    pub fn set_attribute_fmt(&mut self, args: fmt::Arguments<'_>, value: &str) -> OperationState {
        self.set_attribute(&args.to_string(), value)
    }

    /// Replaces every matched CDATA section with a new one holding `value`.
    ///
    /// The replacement becomes the last child of the same parent. Plain text
    /// nodes are left untouched.
    pub fn set_content(&mut self, expr: &str, value: &str) -> OperationState {
        let Some(result) = self.select(expr) else {
            return self.state();
        };
        let Some(document) = self.document_mut() else {
            return self.state();
        };
        for &id in result.nodes() {
            if document.kind(id) != Some(NodeKind::CData) {
                continue;
            }
            let Some(parent) = document.parent(id) else {
                continue;
            };
            let replaced = document.remove(id).and_then(|()| {
                let cdata = document.create_cdata(value);
                document.append_child(parent, cdata)
            });
            if let Err(error) = replaced {
                tracing::warn!(node = %id, %error, "cannot replace CDATA section");
            }
        }
        self.state()
    }

    pub fn set_content_fmt(&mut self, args: fmt::Arguments<'_>, value: &str) -> OperationState {
        self.set_content(&args.to_string(), value)
    }

    /// Detaches and destroys every matched node.
    pub fn remove(&mut self, expr: &str) -> OperationState {
        let Some(result) = self.select(expr) else {
            return self.state();
        };
        self.remove_ids(result.nodes());
        self.state()
    }

    pub fn remove_fmt(&mut self, args: fmt::Arguments<'_>) -> OperationState {
        self.remove(&args.to_string())
    }

    /// Removes the nodes of an earlier result of this context.
    pub fn remove_matches(&mut self, result: &QueryResult) -> OperationState {
        if !self.check_document() {
            return self.state();
        }
        self.remove_ids(result.nodes());
        self.state()
    }

    fn remove_ids(&mut self, ids: &[NodeId]) {
        let Some(document) = self.document_mut() else {
            return;
        };
        let mut removed = 0usize;
        for &id in ids {
            // Descendants of an already removed match are gone with it.
            if !document.contains(id) {
                continue;
            }
            match document.remove(id) {
                Ok(()) => removed += 1,
                Err(error) => tracing::warn!(node = %id, %error, "cannot remove node"),
            }
        }
        tracing::debug!(removed, "removed nodes");
    }
}

#[cfg(test)]
mod tests {
    use crate::{DocumentContext, OperationState, QueryResult, Reason};
    use rstest::{fixture, rstest};

    #[fixture]
    fn ctx() -> DocumentContext {
        let xml = r#"<heros><hero name="Tom" age="20"><bio><![CDATA[old]]></bio><note>plain</note></hero></heros>"#;
        DocumentContext::from(xmlctx_dom::parse(xml).unwrap())
    }

    #[rstest]
    fn validation_order(mut ctx: DocumentContext) {
        let mut empty = DocumentContext::new(None);
        assert!(!empty.exists("//hero"));
        assert_eq!(empty.state(), OperationState::error(Reason::SourceInvalid));

        assert!(!ctx.exists(""));
        assert_eq!(ctx.state(), OperationState::error(Reason::PathInvalid));
        assert!(!ctx.exists("//hero[@"));
        assert_eq!(ctx.state(), OperationState::error(Reason::PathInvalid));
        assert!(ctx.exists("//hero"));
        assert_eq!(ctx.state(), OperationState::success(Reason::NoReason));
    }

    #[rstest]
    fn runtime_failures_are_path_errors(mut ctx: DocumentContext) {
        assert!(!ctx.exists("//x:hero"));
        assert_eq!(ctx.state(), OperationState::error(Reason::PathInvalid));
    }

    #[rstest]
    fn set_attribute_only_touches_attributes(mut ctx: DocumentContext) {
        ctx.set_attribute("//hero/@age | //hero", "21");
        assert_eq!(ctx.attribute("age", "//hero").as_deref(), Some("21"));
        assert_eq!(ctx.evaluate("count(//hero/@*)"), Some(QueryResult::Number(2.0)));
    }

    #[rstest]
    fn remove_tolerates_nested_matches(mut ctx: DocumentContext) {
        let state = ctx.remove("//hero | //hero/bio");
        assert!(state.is_success());
        assert!(!ctx.exists("//hero"));
        assert!(ctx.exists("/heros"));
    }

    #[rstest]
    fn remove_matches_uses_prior_results(mut ctx: DocumentContext) {
        let notes = ctx.evaluate("//note").unwrap();
        ctx.remove_matches(&notes);
        assert!(!ctx.exists("//note"));
    }

    #[rstest]
    fn template_variants_format_the_path(mut ctx: DocumentContext) {
        let name = "Tom";
        assert!(ctx.exists_fmt(format_args!("//hero[@name='{name}']")));
        ctx.remove_fmt(format_args!("//hero[@name='{name}']/note"));
        assert!(!ctx.exists("//note"));
    }
}
