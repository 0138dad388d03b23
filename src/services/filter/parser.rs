use super::{FilterError, Node, Operator, SubstringPattern};

// 嵌套层数上限，求值和打印同样是递归的
pub(super) const MAX_DEPTH: usize = 256;

// 值片段：普通文本或未转义的 `*`
enum Segment {
    Text(String),
    Star,
}

pub(super) fn parse(input: &str) -> Result<Node, FilterError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        depth: 0,
    };
    parser.skip_whitespace();
    if parser.at_end() {
        return Err(parser.error("Empty filter"));
    }
    let node = parser.parse_filter()?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.error("Extraneous trailing characters"));
    }
    Ok(node)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn error(&self, message: &str) -> FilterError {
        FilterError {
            message: message.to_string(),
            position: self.pos,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("Expected '{expected}'")))
        }
    }

    fn parse_filter(&mut self) -> Result<Node, FilterError> {
        self.skip_whitespace();
        self.expect('(')?;
        if self.depth >= MAX_DEPTH {
            return Err(self.error("Filter nested too deeply"));
        }
        self.depth += 1;
        let node = self.parse_filter_comp()?;
        self.depth -= 1;
        self.skip_whitespace();
        self.expect(')')?;
        Ok(node)
    }

    fn parse_filter_comp(&mut self) -> Result<Node, FilterError> {
        self.skip_whitespace();
        match self.peek() {
            Some('&') => {
                self.pos += 1;
                Ok(Node::And(self.parse_filter_list()?))
            }
            Some('|') => {
                self.pos += 1;
                Ok(Node::Or(self.parse_filter_list()?))
            }
            Some('!') => {
                self.pos += 1;
                Ok(Node::Not(Box::new(self.parse_filter()?)))
            }
            Some(_) => self.parse_item(),
            None => Err(self.error("Unexpected end of filter")),
        }
    }

    fn parse_filter_list(&mut self) -> Result<Vec<Node>, FilterError> {
        let mut operands = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() != Some('(') {
                break;
            }
            operands.push(self.parse_filter()?);
        }
        if operands.is_empty() {
            return Err(self.error("Missing subfilter"));
        }
        Ok(operands)
    }

    fn parse_item(&mut self) -> Result<Node, FilterError> {
        let attr = self.parse_attr()?;
        let op = match (self.peek(), self.peek_at(1)) {
            (Some('~'), Some('=')) => {
                self.pos += 2;
                Operator::Approx
            }
            (Some('>'), Some('=')) => {
                self.pos += 2;
                Operator::GreaterEq
            }
            (Some('<'), Some('=')) => {
                self.pos += 2;
                Operator::LessEq
            }
            (Some('='), _) => {
                self.pos += 1;
                Operator::Equal
            }
            _ => return Err(self.error("Invalid operator")),
        };

        let segments = self.parse_value(op == Operator::Equal)?;
        if op != Operator::Equal || !segments.iter().any(|s| matches!(s, Segment::Star)) {
            let value = segments
                .into_iter()
                .map(|s| match s {
                    Segment::Text(text) => text,
                    Segment::Star => "*".to_string(),
                })
                .collect();
            return Ok(Node::Compare { attr, op, value });
        }

        if let [Segment::Star] = segments.as_slice() {
            return Ok(Node::Present(attr));
        }
        Ok(Node::Substring {
            attr,
            pattern: to_pattern(segments),
        })
    }

    fn parse_attr(&mut self) -> Result<String, FilterError> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().collect();
        let attr = attr.trim_end();
        if attr.is_empty() {
            return Err(FilterError {
                message: "Missing attribute name".to_string(),
                position: start,
            });
        }
        Ok(attr.to_string())
    }

    fn parse_value(&mut self, wildcards: bool) -> Result<Vec<Segment>, FilterError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("Unexpected end of filter")),
                Some(')') => break,
                Some('(') => return Err(self.error("Invalid value")),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self
                        .peek()
                        .ok_or_else(|| self.error("Unexpected end of filter"))?;
                    text.push(escaped);
                    self.pos += 1;
                }
                Some('*') if wildcards => {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    // 连续的 `*` 视为一个
                    if !matches!(segments.last(), Some(Segment::Star)) {
                        segments.push(Segment::Star);
                    }
                    self.pos += 1;
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        if !text.is_empty() || segments.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(segments)
    }
}

fn to_pattern(segments: Vec<Segment>) -> SubstringPattern {
    let mut pattern = SubstringPattern {
        initial: None,
        any: Vec::new(),
        last: None,
    };
    let count = segments.len();
    for (i, segment) in segments.into_iter().enumerate() {
        if let Segment::Text(text) = segment {
            if i == 0 {
                pattern.initial = Some(text);
            } else if i == count - 1 {
                pattern.last = Some(text);
            } else {
                pattern.any.push(text);
            }
        }
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compare(attr: &str, op: Operator, value: &str) -> Node {
        Node::Compare {
            attr: attr.to_string(),
            op,
            value: value.to_string(),
        }
    }

    fn nested_not(depth: usize) -> String {
        format!("{}(a=b){}", "(!".repeat(depth), ")".repeat(depth))
    }

    #[test]
    fn test_parse_rejects_excessive_nesting() {
        assert!(parse(&nested_not(MAX_DEPTH - 1)).is_ok());

        let err = parse(&nested_not(MAX_DEPTH)).unwrap_err();
        assert_eq!(err.message, "Filter nested too deeply");
        assert_eq!(err.position, 2 * MAX_DEPTH + 1);

        // 远超上限时同样返回错误而不是栈溢出
        assert!(parse(&nested_not(200_000)).is_err());
    }

    #[test]
    fn test_parse_simple_operators() {
        assert_eq!(parse("(a=b)").unwrap(), compare("a", Operator::Equal, "b"));
        assert_eq!(parse("(a~=b)").unwrap(), compare("a", Operator::Approx, "b"));
        assert_eq!(parse("(a>=5)").unwrap(), compare("a", Operator::GreaterEq, "5"));
        assert_eq!(parse("(a<=5)").unwrap(), compare("a", Operator::LessEq, "5"));
        assert_eq!(parse("(a=)").unwrap(), compare("a", Operator::Equal, ""));
    }

    #[test]
    fn test_parse_presence_and_substring() {
        assert_eq!(parse("(a=*)").unwrap(), Node::Present("a".to_string()));

        let node = parse("(name=*foo*bar)").unwrap();
        assert_eq!(
            node,
            Node::Substring {
                attr: "name".to_string(),
                pattern: SubstringPattern {
                    initial: None,
                    any: vec!["foo".to_string()],
                    last: Some("bar".to_string()),
                },
            }
        );
    }

    #[test]
    fn test_star_is_literal_for_ordering_operators() {
        assert_eq!(parse("(a>=x*)").unwrap(), compare("a", Operator::GreaterEq, "x*"));
        assert_eq!(parse("(a=\\*)").unwrap(), compare("a", Operator::Equal, "*"));
    }

    #[test]
    fn test_parse_nested_composites() {
        let node = parse("(|(&(a=1)(b=2))(!(c=3)))").unwrap();
        match node {
            Node::Or(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[0], Node::And(ref inner) if inner.len() == 2));
                assert!(matches!(children[1], Node::Not(_)));
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_attribute_whitespace_is_trimmed() {
        assert_eq!(parse("( a =b)").unwrap(), compare("a", Operator::Equal, "b"));
    }

    #[test]
    fn test_malformed_filters_are_rejected() {
        for bad in [
            "",
            "   ",
            "a=b",
            "(a=b",
            "(=b)",
            "(a b)",
            "(&)",
            "(!)",
            "(a=b))",
            "(a=(b))",
            "(a=b\\",
            "(a<b)",
        ] {
            assert!(parse(bad).is_err(), "filter should be rejected: {bad:?}");
        }
    }

    #[test]
    fn test_error_reports_position() {
        let err = parse("(a=b)(c=d)").unwrap_err();
        assert_eq!(err.position, 5);
        assert_eq!(err.message, "Extraneous trailing characters");
    }
}
