//! LDAP 风格的过滤表达式
//!
//! 支持 `&`、`|`、`!`、`=`、`~=`、`>=`、`<=`、存在性 (`attr=*`)、
//! 子串通配 (`attr=foo*bar`) 以及 `\` 转义。属性名大小写不敏感。

mod matcher;
mod parser;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::services::registry::properties::Properties;

/// 过滤表达式解析错误
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid filter at position {position}: {message}")]
pub struct FilterError {
    pub message: String,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::Approx => "~=",
            Operator::GreaterEq => ">=",
            Operator::LessEq => "<=",
        }
    }
}

/// 子串模式：`initial*any*...*last`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SubstringPattern {
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub last: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Compare {
        attr: String,
        op: Operator,
        value: String,
    },
    Present(String),
    Substring {
        attr: String,
        pattern: SubstringPattern,
    },
}

/// 已解析的过滤表达式
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    root: Node,
}

impl Filter {
    pub fn parse(expr: &str) -> Result<Self, FilterError> {
        parser::parse(expr).map(|root| Self { root })
    }

    /// 对属性集求值
    pub fn matches(&self, properties: &Properties) -> bool {
        matcher::eval(&self.root, properties)
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, &self.root)
    }
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &Node) -> fmt::Result {
    match node {
        Node::And(children) | Node::Or(children) => {
            let symbol = if matches!(node, Node::And(_)) { '&' } else { '|' };
            write!(f, "({symbol}")?;
            for child in children {
                write_node(f, child)?;
            }
            write!(f, ")")
        }
        Node::Not(child) => {
            write!(f, "(!")?;
            write_node(f, child)?;
            write!(f, ")")
        }
        Node::Compare { attr, op, value } => {
            write!(f, "({attr}{}{})", op.symbol(), escape(value))
        }
        Node::Present(attr) => write!(f, "({attr}=*)"),
        Node::Substring { attr, pattern } => {
            write!(f, "({attr}=")?;
            if let Some(initial) = &pattern.initial {
                write!(f, "{}", escape(initial))?;
            }
            write!(f, "*")?;
            for part in &pattern.any {
                write!(f, "{}*", escape(part))?;
            }
            if let Some(last) = &pattern.last {
                write!(f, "{}", escape(last))?;
            }
            write!(f, ")")
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '(' | ')' | '*') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_canonical_form() {
        let filter = Filter::parse(" ( & (objectClass=Foo) (! (a~=b)) (name=x*y\\*z*) ) ")
            .expect("Failed to parse filter");
        assert_eq!(filter.to_string(), "(&(objectClass=Foo)(!(a~=b))(name=x*y\\*z*))");

        let reparsed = Filter::parse(&filter.to_string()).expect("Failed to reparse filter");
        assert_eq!(reparsed, filter);
    }

    #[test]
    fn test_from_str() {
        let filter: Filter = "(service.ranking>=5)".parse().expect("Failed to parse filter");
        assert_eq!(filter.to_string(), "(service.ranking>=5)");
    }
}
