use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, multispace0};
use nom::combinator::opt;
use nom::{IResult, Parser};

use crate::core::error::{Error, Result};
use crate::filter::ast::{FilterNode, FilterOp, FilterValue};

/// Parser for the infix filter grammar:
///
/// ```text
/// expr    := and_expr ( '||' and_expr )*
/// and_expr:= primary ( '&&' primary )*
/// primary := '(' expr ')' | '!'? '$' Collection '(' expr ')' | leaf
/// leaf    := field ':' ( '=' | '!=' | '<' | '<=' | '>' | '>=' )? rhs
/// rhs     := value | '[' lo .. hi ']' | '[' v1, v2, ... ']'
/// ```
///
/// Values are bare tokens or backtick-quoted strings; backticks suppress
/// numeric interpretation.
pub struct FilterParser;

impl FilterParser {
    pub fn new() -> Self {
        FilterParser
    }

    pub fn parse(&self, input: &str) -> Result<FilterNode> {
        match or_expr(input) {
            Ok((rest, node)) => {
                let rest = rest.trim();
                if !rest.is_empty() {
                    return Err(Error::parse(format!(
                        "Could not parse the filter query: unexpected token at `{}`.",
                        rest
                    )));
                }
                Ok(node)
            }
            Err(_) => Err(Error::parse(format!(
                "Could not parse the filter query `{}`.",
                input
            ))),
        }
    }
}

impl Default for FilterParser {
    fn default() -> Self {
        Self::new()
    }
}

fn field_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '.' || c == '-').parse(input)
}

fn collection_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_').parse(input)
}

/// One literal: a backtick-quoted string or a bare token. Returns the raw
/// text and whether it was quoted.
fn value_token(input: &str) -> IResult<&str, (&str, bool)> {
    if input.starts_with('`') {
        let (input, raw) = nom::sequence::delimited(
            char('`'),
            take_while1(|c: char| c != '`'),
            char('`'),
        )
        .parse(input)?;
        return Ok((input, (raw, true)));
    }

    let (input, raw) = take_while1(|c: char| {
        !c.is_whitespace() && !",()[]`&|".contains(c)
    })
    .parse(input)?;
    Ok((input, (raw, false)))
}

fn typed_value(raw: &str, quoted: bool) -> FilterValue {
    if quoted {
        return FilterValue::Str(raw.to_string());
    }
    if let Ok(v) = raw.parse::<i64>() {
        return FilterValue::Int(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return FilterValue::Float(v);
    }
    if raw.eq_ignore_ascii_case("true") {
        return FilterValue::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return FilterValue::Bool(false);
    }
    FilterValue::Str(raw.to_string())
}

/// Bracket contents: either a `lo..hi` range or a comma/whitespace separated
/// value list.
fn bracket_values(input: &str) -> IResult<&str, (Vec<FilterValue>, bool)> {
    let (mut input, _) = char('[').parse(input)?;
    let mut raw_items: Vec<(String, bool)> = Vec::new();

    loop {
        let (rest, _) = multispace0(input)?;
        if let Ok((rest, _)) = char::<&str, nom::error::Error<&str>>(']').parse(rest) {
            input = rest;
            break;
        }

        let (rest, (raw, quoted)) = value_token(rest)?;
        raw_items.push((raw.to_string(), quoted));

        let (rest, _) = multispace0(rest)?;
        let (rest, _) = opt(char(',')).parse(rest)?;
        input = rest;
    }

    // `[lo..hi]` tokenizes as one item; `[lo .. hi]` as three
    let is_range = (raw_items.len() == 1 && !raw_items[0].1 && raw_items[0].0.contains(".."))
        || (raw_items.len() == 3 && raw_items[1].0 == "..");

    if is_range {
        let (lo, hi) = if raw_items.len() == 1 {
            let (lo, hi) = raw_items[0].0.split_once("..").unwrap();
            (lo.to_string(), hi.to_string())
        } else {
            (raw_items[0].0.clone(), raw_items[2].0.clone())
        };

        if !lo.is_empty() && !hi.is_empty() {
            let values = vec![typed_value(&lo, false), typed_value(&hi, false)];
            return Ok((input, (values, true)));
        }
    }

    let values = raw_items
        .into_iter()
        .map(|(raw, quoted)| typed_value(&raw, quoted))
        .collect();
    Ok((input, (values, false)))
}

fn leaf(input: &str) -> IResult<&str, FilterNode> {
    let (input, field) = field_name(input)?;
    let (input, _) = char(':').parse(input)?;
    let (input, _) = multispace0(input)?;

    // negation: != value or != [list]
    let (input, neq) = opt(tag("!=")).parse(input)?;
    if neq.is_some() {
        let (input, _) = multispace0(input)?;
        if input.starts_with('[') {
            let (input, (values, _)) = bracket_values(input)?;
            return Ok((input, FilterNode::leaf(field, FilterOp::NotIn, values)));
        }
        let (input, (raw, quoted)) = value_token(input)?;
        return Ok((
            input,
            FilterNode::leaf(field, FilterOp::Neq, vec![typed_value(raw, quoted)]),
        ));
    }

    let (input, cmp) = opt(alt((tag("<="), tag(">="), tag("<"), tag(">"), tag("=")))).parse(input)?;
    if let Some(cmp) = cmp {
        let (input, _) = multispace0(input)?;
        let op = match cmp {
            "<=" => FilterOp::Le,
            ">=" => FilterOp::Ge,
            "<" => FilterOp::Lt,
            ">" => FilterOp::Gt,
            _ => FilterOp::Eq, // ':=' exact match
        };
        let (input, (raw, quoted)) = value_token(input)?;
        return Ok((
            input,
            FilterNode::leaf(field, op, vec![typed_value(raw, quoted)]),
        ));
    }

    if input.starts_with('[') {
        let (input, (values, is_range)) = bracket_values(input)?;
        let op = if is_range { FilterOp::Range } else { FilterOp::In };
        return Ok((input, FilterNode::leaf(field, op, values)));
    }

    let (input, (raw, quoted)) = value_token(input)?;
    Ok((
        input,
        FilterNode::leaf(field, FilterOp::Eq, vec![typed_value(raw, quoted)]),
    ))
}

fn primary(input: &str) -> IResult<&str, FilterNode> {
    let (input, _) = multispace0(input)?;

    if input.starts_with('(') {
        let (input, _) = char('(').parse(input)?;
        let (input, node) = or_expr(input)?;
        let (input, _) = multispace0(input)?;
        let (input, _) = char(')').parse(input)?;
        return Ok((input, node));
    }

    if input.starts_with('!') || input.starts_with('$') {
        let (input, negated) = opt(char('!')).parse(input)?;
        let (input, _) = char('$').parse(input)?;
        let (input, collection) = collection_name(input)?;
        let (input, _) = char('(').parse(input)?;
        let (input, inner) = or_expr(input)?;
        let (input, _) = multispace0(input)?;
        let (input, _) = char(')').parse(input)?;

        return Ok((
            input,
            FilterNode::ReferenceJoin {
                collection: collection.to_string(),
                negated: negated.is_some(),
                inner: Box::new(inner),
            },
        ));
    }

    leaf(input)
}

fn and_expr(input: &str) -> IResult<&str, FilterNode> {
    let (mut input, first) = primary(input)?;
    let mut children = vec![first];

    loop {
        let (rest, _) = multispace0(input)?;
        match tag::<&str, &str, nom::error::Error<&str>>("&&").parse(rest) {
            Ok((rest, _)) => {
                let (rest, node) = primary(rest)?;
                children.push(node);
                input = rest;
            }
            Err(_) => break,
        }
    }

    if children.len() == 1 {
        Ok((input, children.pop().unwrap()))
    } else {
        Ok((input, FilterNode::And(children)))
    }
}

fn or_expr(input: &str) -> IResult<&str, FilterNode> {
    let (mut input, first) = and_expr(input)?;
    let mut children = vec![first];

    loop {
        let (rest, _) = multispace0(input)?;
        match tag::<&str, &str, nom::error::Error<&str>>("||").parse(rest) {
            Ok((rest, _)) => {
                let (rest, node) = and_expr(rest)?;
                children.push(node);
                input = rest;
            }
            Err(_) => break,
        }
    }

    if children.len() == 1 {
        Ok((input, children.pop().unwrap()))
    } else {
        Ok((input, FilterNode::Or(children)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ast::FilterLeaf;

    fn parse(input: &str) -> FilterNode {
        FilterParser::new().parse(input).unwrap()
    }

    fn as_leaf(node: FilterNode) -> FilterLeaf {
        match node {
            FilterNode::Leaf(leaf) => leaf,
            other => panic!("expected leaf, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_equality() {
        let leaf = as_leaf(parse("name:Jeremy"));
        assert_eq!(leaf.field, "name");
        assert_eq!(leaf.op, FilterOp::Eq);
        assert_eq!(leaf.values, vec![FilterValue::Str("Jeremy".to_string())]);
    }

    #[test]
    fn test_exact_match_operator() {
        let leaf = as_leaf(parse("category:=Shoes"));
        assert_eq!(leaf.op, FilterOp::Eq);
    }

    #[test]
    fn test_comparators() {
        assert_eq!(as_leaf(parse("age:>24")).op, FilterOp::Gt);
        assert_eq!(as_leaf(parse("age:>=24")).op, FilterOp::Ge);
        assert_eq!(as_leaf(parse("age:<21")).op, FilterOp::Lt);
        assert_eq!(as_leaf(parse("age:<=21")).op, FilterOp::Le);
        assert_eq!(
            as_leaf(parse("age:>24")).values,
            vec![FilterValue::Int(24)]
        );
    }

    #[test]
    fn test_negation() {
        let leaf = as_leaf(parse("name:!=James"));
        assert_eq!(leaf.op, FilterOp::Neq);
    }

    #[test]
    fn test_in_list_with_spaces() {
        let leaf = as_leaf(parse("tags:[fine platinum]"));
        assert_eq!(leaf.op, FilterOp::In);
        assert_eq!(
            leaf.values,
            vec![
                FilterValue::Str("fine".to_string()),
                FilterValue::Str("platinum".to_string())
            ]
        );
    }

    #[test]
    fn test_in_list_with_commas() {
        let leaf = as_leaf(parse("size:[S, M, XL]"));
        assert_eq!(leaf.op, FilterOp::In);
        assert_eq!(leaf.values.len(), 3);
    }

    #[test]
    fn test_not_in_list() {
        let leaf = as_leaf(parse("size:!=[S, M]"));
        assert_eq!(leaf.op, FilterOp::NotIn);
        assert_eq!(leaf.values.len(), 2);
    }

    #[test]
    fn test_range() {
        let leaf = as_leaf(parse("age:[21..24]"));
        assert_eq!(leaf.op, FilterOp::Range);
        assert_eq!(
            leaf.values,
            vec![FilterValue::Int(21), FilterValue::Int(24)]
        );

        let leaf = as_leaf(parse("age:[21 .. 24]"));
        assert_eq!(leaf.op, FilterOp::Range);
    }

    #[test]
    fn test_backtick_value_stays_string() {
        let leaf = as_leaf(parse("code:`42`"));
        assert_eq!(leaf.values, vec![FilterValue::Str("42".to_string())]);
    }

    #[test]
    fn test_and_or_precedence() {
        // && binds tighter than ||
        let node = parse("a:1 || b:2 && c:3");
        match node {
            FilterNode::Or(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[0], FilterNode::Leaf(_)));
                assert!(matches!(&children[1], FilterNode::And(inner) if inner.len() == 2));
            }
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_parentheses() {
        let node = parse("(a:1 || b:2) && c:3");
        match node {
            FilterNode::And(children) => {
                assert!(matches!(&children[0], FilterNode::Or(inner) if inner.len() == 2));
            }
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_reference_join() {
        let node = parse("$Customers(customer_name:Joe && product_price:<100)");
        match node {
            FilterNode::ReferenceJoin {
                collection,
                negated,
                inner,
            } => {
                assert_eq!(collection, "Customers");
                assert!(!negated);
                assert!(matches!(*inner, FilterNode::And(_)));
            }
            other => panic!("expected join, got {:?}", other),
        }
    }

    #[test]
    fn test_negated_reference_join() {
        let node = parse("!$Orders(status:open)");
        match node {
            FilterNode::ReferenceJoin { negated, .. } => assert!(negated),
            other => panic!("expected join, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_filters_fail() {
        let parser = FilterParser::new();
        assert!(parser.parse("").is_err());
        assert!(parser.parse("name:").is_err());
        assert!(parser.parse("(a:1").is_err());
        assert!(parser.parse("a:1 &&").is_err());
        assert!(parser.parse("a:1 extra").is_err());
    }

    #[test]
    fn test_bool_and_float_values() {
        assert_eq!(
            as_leaf(parse("in_stock:true")).values,
            vec![FilterValue::Bool(true)]
        );
        assert_eq!(
            as_leaf(parse("rating:>=4.5")).values,
            vec![FilterValue::Float(4.5)]
        );
    }
}
