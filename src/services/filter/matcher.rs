use std::cmp::Ordering;

use super::{Node, Operator, SubstringPattern};
use crate::services::registry::properties::{Properties, PropertyValue};

pub(super) fn eval(node: &Node, properties: &Properties) -> bool {
    match node {
        Node::And(children) => children.iter().all(|child| eval(child, properties)),
        Node::Or(children) => children.iter().any(|child| eval(child, properties)),
        Node::Not(child) => !eval(child, properties),
        Node::Present(attr) => properties.contains_key(attr),
        Node::Compare { attr, op, value } => properties
            .get(attr)
            .is_some_and(|actual| compare(actual, *op, value)),
        Node::Substring { attr, pattern } => properties
            .get(attr)
            .is_some_and(|actual| substring(actual, pattern)),
    }
}

fn compare(actual: &PropertyValue, op: Operator, expected: &str) -> bool {
    match actual {
        PropertyValue::String(s) => match op {
            Operator::Equal => s == expected,
            Operator::Approx => approx_eq(s, expected),
            Operator::GreaterEq => s.as_str() >= expected,
            Operator::LessEq => s.as_str() <= expected,
        },
        PropertyValue::Long(n) => match expected.trim().parse::<i64>() {
            Ok(other) => ordered(n.cmp(&other), op),
            Err(_) => false,
        },
        PropertyValue::Double(d) => match expected.trim().parse::<f64>() {
            Ok(other) => d.partial_cmp(&other).is_some_and(|ord| ordered(ord, op)),
            Err(_) => false,
        },
        PropertyValue::Bool(b) => match expected.trim().to_ascii_lowercase().as_str() {
            "true" => *b,
            "false" => !*b,
            _ => false,
        },
        PropertyValue::List(items) => items.iter().any(|item| compare(item, op, expected)),
    }
}

fn ordered(ord: Ordering, op: Operator) -> bool {
    match op {
        Operator::Equal | Operator::Approx => ord == Ordering::Equal,
        Operator::GreaterEq => ord != Ordering::Less,
        Operator::LessEq => ord != Ordering::Greater,
    }
}

// 忽略空白和大小写
fn approx_eq(left: &str, right: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    };
    normalize(left) == normalize(right)
}

fn substring(actual: &PropertyValue, pattern: &SubstringPattern) -> bool {
    match actual {
        PropertyValue::String(s) => substring_str(s, pattern),
        PropertyValue::List(items) => items.iter().any(|item| substring(item, pattern)),
        _ => false,
    }
}

fn substring_str(s: &str, pattern: &SubstringPattern) -> bool {
    let mut rest = s;
    if let Some(initial) = &pattern.initial {
        match rest.strip_prefix(initial.as_str()) {
            Some(remaining) => rest = remaining,
            None => return false,
        }
    }
    for part in &pattern.any {
        match rest.find(part.as_str()) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    match &pattern.last {
        Some(last) => rest.ends_with(last.as_str()),
        None => true,
    }
}
