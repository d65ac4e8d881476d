//! Expression grammar for inventory-query bodies
//!
//! A query body is a whitespace-separated token stream with three shapes:
//!
//! - `PATH`: collect the value at PATH from every inventory row
//! - `PATH if TEST (and|or TEST)*`: collect PATH where the tests pass
//! - `if TEST (and|or TEST)*`: collect the names of passing nodes
//!
//! where `TEST` is `OPERAND (==|!=) OPERAND`. Operands rooted at `exports:`
//! index the current inventory row, operands rooted at `self:` index the
//! querying node's parameters, `true`/`false` are booleans, and numeric
//! tokens are numbers; everything else is a literal string. Keywords and
//! the `+IgnoreErrors` / `+AllEnvs` options match case-insensitively.

use serde_json::Value as Json;

use crate::core::error::{Error, Result};
use crate::node::tree::{self, Dict, Node};
use crate::path::DictPath;

pub const OPT_IGNORE_ERRORS: &str = "+ignoreerrors";
pub const OPT_ALL_ENVS: &str = "+allenvs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    Value,
    Test,
    ListTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOp {
    Equal,
    NotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

/// One classified operand of an equality test.
#[derive(Debug, Clone)]
enum Operand {
    Export(DictPath),
    Param(DictPath),
    Literal(Json),
}

/// `exports:… ==|!= value` with the value either a literal or a `self:`
/// parameter lookup.
#[derive(Debug, Clone)]
pub struct EqualityTest {
    export_path: DictPath,
    parameter_path: Option<DictPath>,
    literal: Option<Json>,
    op: TestOp,
}

/// A chain of equality tests joined by and/or, evaluated left to right.
#[derive(Debug, Clone, Default)]
pub struct LogicTest {
    tests: Vec<EqualityTest>,
    ops: Vec<LogicOp>,
}

/// The parsed form of a query body.
#[derive(Debug, Clone)]
pub struct ParsedExpr {
    pub kind: ExprKind,
    pub value_path: Option<DictPath>,
    pub question: LogicTest,
    pub ignore_errors: bool,
    pub all_envs: bool,
}

impl EqualityTest {
    fn new(left: Operand, op: TestOp, right: Operand) -> Result<Self> {
        let mut export = None;
        let mut parameter = None;
        let mut literal = None;
        for operand in [left, right] {
            match operand {
                Operand::Export(p) => export = Some(p),
                Operand::Param(p) => parameter = Some(p),
                Operand::Literal(v) => literal = Some(v),
            }
        }
        let export_path = export.ok_or_else(|| expression_error("no export in test"))?;
        Ok(Self {
            export_path,
            parameter_path: parameter,
            literal,
            op,
        })
    }

    /// Evaluate against one inventory row. `self:` operands resolve in the
    /// querying node's parameter tree, which the interpolator has already
    /// settled for every path this test references.
    pub fn passes(&self, context: Option<&Dict>, row: &Json) -> Result<bool> {
        let expected = match &self.parameter_path {
            Some(path) => resolve_in_tree(path, context)?,
            None => self
                .literal
                .clone()
                .ok_or_else(|| expression_error("test value failed to render"))?,
        };
        match self.export_path.get(row) {
            Some(found) => {
                let equal = json_eq(found, &expected);
                Ok(match self.op {
                    TestOp::Equal => equal,
                    TestOp::NotEqual => !equal,
                })
            }
            None => Ok(false),
        }
    }

    pub fn export_path(&self) -> &DictPath {
        &self.export_path
    }

    pub fn parameter_path(&self) -> Option<&DictPath> {
        self.parameter_path.as_ref()
    }
}

impl LogicTest {
    /// True when there are no tests at all (the VALUE expression shape).
    pub fn passes(&self, context: Option<&Dict>, row: &Json) -> Result<bool> {
        let mut tests = self.tests.iter();
        let Some(first) = tests.next() else {
            return Ok(true);
        };
        let mut result = first.passes(context, row)?;
        for (op, test) in self.ops.iter().zip(tests) {
            let next = test.passes(context, row)?;
            result = match op {
                LogicOp::And => result && next,
                LogicOp::Or => result || next,
            };
        }
        Ok(result)
    }

    pub fn tests(&self) -> &[EqualityTest] {
        &self.tests
    }
}

fn resolve_in_tree(path: &DictPath, context: Option<&Dict>) -> Result<Json> {
    let found = context.and_then(|ctx| tree::get(ctx, path));
    match found {
        Some(Node::Done(j)) => Ok(j.clone()),
        _ => Err(Error::Resolve {
            reference: path.to_string(),
            context: String::new(),
            uri: String::new(),
            nodename: String::new(),
        }),
    }
}

/// Equality with numeric coercion, so `1 == 1.0` holds across the
/// int/float boundary the way the expression language expects.
pub fn json_eq(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn expression_error(message: impl Into<String>) -> Error {
    Error::Expression {
        message: message.into(),
        context: String::new(),
        uri: String::new(),
        nodename: String::new(),
    }
}

fn classify_operand(token: &str, delimiter: char) -> Operand {
    let path = DictPath::from_string(delimiter, token);
    match path.parts()[0].to_lowercase().as_str() {
        "exports" => return Operand::Export(path.drop_first()),
        "self" => return Operand::Param(path.drop_first()),
        "true" => return Operand::Literal(Json::Bool(true)),
        "false" => return Operand::Literal(Json::Bool(false)),
        _ => {}
    }
    if let Ok(n) = token.parse::<i64>() {
        return Operand::Literal(Json::from(n));
    }
    if looks_numeric(token) {
        if let Ok(f) = token.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Operand::Literal(Json::Number(n));
            }
        }
    }
    Operand::Literal(Json::String(token.to_string()))
}

/// Signed decimal with an optional leading or trailing point; rules out
/// `inf`/`nan` spellings that `f64::from_str` would otherwise accept.
fn looks_numeric(token: &str) -> bool {
    let body = token.strip_prefix(&['-', '+'][..]).unwrap_or(token);
    !body.is_empty()
        && body.chars().any(|c| c.is_ascii_digit())
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.matches('.').count() <= 1
}

fn parse_test_op(token: &str) -> Result<TestOp> {
    match token {
        "==" => Ok(TestOp::Equal),
        "!=" => Ok(TestOp::NotEqual),
        other => Err(expression_error(format!("unknown test '{}'", other))),
    }
}

fn parse_logic_op(token: &str) -> Result<LogicOp> {
    match token.to_lowercase().as_str() {
        "and" => Ok(LogicOp::And),
        "or" => Ok(LogicOp::Or),
        other => Err(expression_error(format!("unknown operator '{}'", other))),
    }
}

fn parse_tests(tokens: &[&str], delimiter: char) -> Result<LogicTest> {
    if tokens.len() < 3 || (tokens.len() - 3) % 4 != 0 {
        return Err(expression_error(format!(
            "malformed test expression '{}'",
            tokens.join(" ")
        )));
    }
    let mut tests = Vec::new();
    let mut ops = Vec::new();
    tests.push(EqualityTest::new(
        classify_operand(tokens[0], delimiter),
        parse_test_op(tokens[1])?,
        classify_operand(tokens[2], delimiter),
    )?);
    let mut idx = 3;
    while idx < tokens.len() {
        ops.push(parse_logic_op(tokens[idx])?);
        tests.push(EqualityTest::new(
            classify_operand(tokens[idx + 1], delimiter),
            parse_test_op(tokens[idx + 2])?,
            classify_operand(tokens[idx + 3], delimiter),
        )?);
        idx += 4;
    }
    Ok(LogicTest { tests, ops })
}

/// Parse a query body into its expression shape.
pub fn parse_expression(body: &str, delimiter: char) -> Result<ParsedExpr> {
    let tokens: Vec<&str> = body.split_whitespace().collect();
    let mut ignore_errors = false;
    let mut all_envs = false;
    let mut idx = 0;
    while idx < tokens.len() {
        match tokens[idx].to_lowercase().as_str() {
            OPT_IGNORE_ERRORS => ignore_errors = true,
            OPT_ALL_ENVS => all_envs = true,
            _ => break,
        }
        idx += 1;
    }
    let rest = &tokens[idx..];
    let (kind, value_path, question) = match rest {
        [] => return Err(expression_error("empty inventory query")),
        [first, tail @ ..] if first.eq_ignore_ascii_case("if") => {
            (ExprKind::ListTest, None, parse_tests(tail, delimiter)?)
        }
        [single] => (
            ExprKind::Value,
            Some(DictPath::from_string(delimiter, single).drop_first()),
            LogicTest::default(),
        ),
        [first, second, tail @ ..] if second.eq_ignore_ascii_case("if") => (
            ExprKind::Test,
            Some(DictPath::from_string(delimiter, first).drop_first()),
            parse_tests(tail, delimiter)?,
        ),
        _ => {
            return Err(expression_error(format!(
                "failed to parse '{}'",
                body.trim()
            )))
        }
    };
    Ok(ParsedExpr {
        kind,
        value_path,
        question,
        ignore_errors,
        all_envs,
    })
}
