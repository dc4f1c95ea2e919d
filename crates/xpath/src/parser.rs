use crate::ast::{ArithOp, Axis, CompareOp, Expr, NameRef, NameTest, NodeTest, PathExpr, PathStart, Step};
use crate::runtime::Error;
use pest::Parser;
use pest::error::InputLocation;
use pest::iterators::{Pair, Pairs};

#[derive(pest_derive::Parser)]
#[grammar = "xpath.pest"]
pub struct XPathParser;

/// Parses an XPath 1.0 expression into its syntax tree.
pub fn parse_xpath(source: &str) -> Result<Expr, Error> {
    let mut pairs = XPathParser::parse(Rule::xpath, source).map_err(|err| {
        let position = match err.location {
            InputLocation::Pos(pos) => pos,
            InputLocation::Span((start, _)) => start,
        };
        Error::syntax(format!("invalid expression '{source}' at offset {position}"))
    })?;
    let root = next_pair(&mut pairs)?;
    let mut inner = root.into_inner();
    build_expr(next_pair(&mut inner)?)
}

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>) -> Result<Pair<'i, Rule>, Error> {
    pairs.next().ok_or_else(|| Error::syntax("incomplete expression"))
}

fn unexpected(pair: &Pair<'_, Rule>) -> Error {
    Error::syntax(format!("unexpected {:?} '{}'", pair.as_rule(), pair.as_str()))
}

fn build_expr(pair: Pair<'_, Rule>) -> Result<Expr, Error> {
    match pair.as_rule() {
        Rule::expr | Rule::paren_expr => build_expr(next_pair(&mut pair.into_inner())?),
        Rule::or_expr
        | Rule::and_expr
        | Rule::equality_expr
        | Rule::relational_expr
        | Rule::additive_expr
        | Rule::multiplicative_expr => fold_binary(pair.into_inner()),
        Rule::unary_expr => {
            let mut negations = 0usize;
            let mut operand = None;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::neg => negations += 1,
                    _ => operand = Some(build_expr(inner)?),
                }
            }
            let mut expr = operand.ok_or_else(|| Error::syntax("missing operand after '-'"))?;
            for _ in 0..negations {
                expr = Expr::Negate(Box::new(expr));
            }
            Ok(expr)
        }
        Rule::union_expr => {
            let mut inner = pair.into_inner();
            let mut expr = build_expr(next_pair(&mut inner)?)?;
            for branch in inner {
                expr = Expr::Union(Box::new(expr), Box::new(build_expr(branch)?));
            }
            Ok(expr)
        }
        Rule::path_expr => build_expr(next_pair(&mut pair.into_inner())?),
        Rule::filter_path => build_filter_path(pair),
        Rule::filter_expr => build_filter(pair),
        Rule::location_path => build_location_path(pair),
        Rule::variable_reference => {
            let name = next_pair(&mut pair.into_inner())?;
            Ok(Expr::Variable(NameRef::parse(name.as_str())))
        }
        Rule::literal => {
            let content = pair.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
            Ok(Expr::Literal(content.to_string()))
        }
        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .map(Expr::Number)
            .map_err(|_| Error::syntax(format!("invalid number '{}'", pair.as_str()))),
        Rule::function_call => {
            let mut inner = pair.into_inner();
            let name = NameRef::parse(next_pair(&mut inner)?.as_str());
            let args = inner.map(build_expr).collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::FunctionCall { name, args })
        }
        _ => Err(unexpected(&pair)),
    }
}

fn fold_binary(mut pairs: Pairs<'_, Rule>) -> Result<Expr, Error> {
    let mut left = build_expr(next_pair(&mut pairs)?)?;
    while let Some(op) = pairs.next() {
        let right = Box::new(build_expr(next_pair(&mut pairs)?)?);
        let lhs = Box::new(left);
        left = match (op.as_rule(), op.as_str()) {
            (Rule::k_or, _) => Expr::Or(lhs, right),
            (Rule::k_and, _) => Expr::And(lhs, right),
            (_, "=") => Expr::Compare { op: CompareOp::Eq, left: lhs, right },
            (_, "!=") => Expr::Compare { op: CompareOp::Ne, left: lhs, right },
            (_, "<") => Expr::Compare { op: CompareOp::Lt, left: lhs, right },
            (_, "<=") => Expr::Compare { op: CompareOp::Le, left: lhs, right },
            (_, ">") => Expr::Compare { op: CompareOp::Gt, left: lhs, right },
            (_, ">=") => Expr::Compare { op: CompareOp::Ge, left: lhs, right },
            (_, "+") => Expr::Arith { op: ArithOp::Add, left: lhs, right },
            (_, "-") => Expr::Arith { op: ArithOp::Sub, left: lhs, right },
            (_, "*") => Expr::Arith { op: ArithOp::Mul, left: lhs, right },
            (_, "div") => Expr::Arith { op: ArithOp::Div, left: lhs, right },
            (_, "mod") => Expr::Arith { op: ArithOp::Mod, left: lhs, right },
            _ => return Err(unexpected(&op)),
        };
    }
    Ok(left)
}

fn build_filter(pair: Pair<'_, Rule>) -> Result<Expr, Error> {
    let mut inner = pair.into_inner();
    let primary = build_expr(next_pair(&mut inner)?)?;
    let predicates = inner.map(build_predicate).collect::<Result<Vec<_>, _>>()?;
    if predicates.is_empty() {
        Ok(primary)
    } else {
        Ok(Expr::Filter { primary: Box::new(primary), predicates })
    }
}

fn build_filter_path(pair: Pair<'_, Rule>) -> Result<Expr, Error> {
    let mut inner = pair.into_inner();
    let filter = build_filter(next_pair(&mut inner)?)?;
    let Some(separator) = inner.next() else {
        return Ok(filter);
    };
    let mut steps = Vec::new();
    if separator.as_str() == "//" {
        steps.push(Step::descendant_or_self());
    }
    steps.extend(build_relative_path(next_pair(&mut inner)?)?);
    Ok(Expr::Path(PathExpr { start: PathStart::Expr(Box::new(filter)), steps }))
}

fn build_location_path(pair: Pair<'_, Rule>) -> Result<Expr, Error> {
    let path = next_pair(&mut pair.into_inner())?;
    match path.as_rule() {
        Rule::relative_location_path => {
            Ok(Expr::Path(PathExpr { start: PathStart::Context, steps: build_relative_path(path)? }))
        }
        Rule::absolute_path => {
            let mut steps = Vec::new();
            for part in path.into_inner() {
                match part.as_rule() {
                    Rule::descendant_root => steps.push(Step::descendant_or_self()),
                    Rule::root => {}
                    _ => steps.extend(build_relative_path(part)?),
                }
            }
            Ok(Expr::Path(PathExpr { start: PathStart::Root, steps }))
        }
        _ => Err(unexpected(&path)),
    }
}

fn build_relative_path(pair: Pair<'_, Rule>) -> Result<Vec<Step>, Error> {
    let mut steps = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::path_sep if part.as_str() == "//" => steps.push(Step::descendant_or_self()),
            Rule::path_sep => {}
            _ => steps.push(build_step(part)?),
        }
    }
    Ok(steps)
}

fn build_step(pair: Pair<'_, Rule>) -> Result<Step, Error> {
    let step = next_pair(&mut pair.into_inner())?;
    match step.as_rule() {
        Rule::parent_step => Ok(Step::new(Axis::Parent, NodeTest::Node)),
        Rule::self_step => Ok(Step::new(Axis::SelfAxis, NodeTest::Node)),
        Rule::axis_step => {
            let mut axis = Axis::Child;
            let mut test = None;
            let mut predicates = Vec::new();
            for part in step.into_inner() {
                match part.as_rule() {
                    Rule::axis_specifier => axis = build_axis(part)?,
                    Rule::node_test => test = Some(build_node_test(part)?),
                    Rule::predicate => predicates.push(build_predicate(part)?),
                    _ => return Err(unexpected(&part)),
                }
            }
            let test = test.ok_or_else(|| Error::syntax("step without node test"))?;
            Ok(Step { axis, test, predicates })
        }
        _ => Err(unexpected(&step)),
    }
}

fn build_axis(pair: Pair<'_, Rule>) -> Result<Axis, Error> {
    let axis = next_pair(&mut pair.into_inner())?;
    match axis.as_rule() {
        Rule::attribute_abbrev => Ok(Axis::Attribute),
        _ => Axis::from_name(axis.as_str())
            .ok_or_else(|| Error::syntax(format!("unknown axis '{}'", axis.as_str()))),
    }
}

fn build_node_test(pair: Pair<'_, Rule>) -> Result<NodeTest, Error> {
    let test = next_pair(&mut pair.into_inner())?;
    match test.as_rule() {
        Rule::kind_test => {
            let kind = next_pair(&mut test.into_inner())?;
            match kind.as_rule() {
                Rule::pi_test => {
                    let target = kind
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::literal)
                        .and_then(|lit| lit.into_inner().next())
                        .map(|content| content.as_str().to_string());
                    Ok(NodeTest::ProcessingInstruction(target))
                }
                Rule::node_type => match kind.as_str() {
                    "comment" => Ok(NodeTest::Comment),
                    "text" => Ok(NodeTest::Text),
                    _ => Ok(NodeTest::Node),
                },
                _ => Err(unexpected(&kind)),
            }
        }
        Rule::name_test => {
            let name = next_pair(&mut test.into_inner())?;
            match name.as_rule() {
                Rule::any_name => Ok(NodeTest::Name(NameTest::Any)),
                Rule::prefix_wildcard => {
                    let prefix = next_pair(&mut name.into_inner())?;
                    Ok(NodeTest::Name(NameTest::AnyInNamespace(prefix.as_str().to_string())))
                }
                _ => Ok(NodeTest::Name(NameTest::Name(NameRef::parse(name.as_str())))),
            }
        }
        _ => Err(unexpected(&test)),
    }
}

fn build_predicate(pair: Pair<'_, Rule>) -> Result<Expr, Error> {
    build_expr(next_pair(&mut pair.into_inner())?)
}
