//! AIR program AST
//!
//! Programs arrive as nested JSON arrays whose first element is an
//! instruction tag (`["seq", ["accum-set!", "distance", 0], ...]`). They are
//! decoded once, at submission, into [`Instr`]; evaluation never looks at
//! tag strings again.
//!
//! Decoding rules:
//!
//! - a non-empty array with a string head is an instruction
//! - an empty array is the empty list literal
//! - every other JSON value is a literal (use `quote` for literal arrays)

use serde_json::Value;
use std::collections::BTreeSet;

use super::error::ProgramError;
use super::value;

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A decoded AIR instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Literal value (`quote` or a bare JSON scalar/document)
    Literal(Value),
    /// `seq e...`
    Seq(Vec<Instr>),
    /// `if [cond, then]...`
    If(Vec<(Instr, Instr)>),
    /// `for-each [var, seq] body...` (several bindings nest)
    ForEach {
        bindings: Vec<(String, Instr)>,
        body: Vec<Instr>,
    },
    /// `let [[var, expr]...] body...`
    Let {
        bindings: Vec<(String, Instr)>,
        body: Vec<Instr>,
    },
    /// `accum-set! name expr`
    AccumSet { name: String, value: Box<Instr> },
    /// `accum-clear! name`
    AccumClear { name: String },
    /// `accum-ref name`
    AccumRef { name: String },
    /// `send-to-accum target name value`
    SendToAccum {
        target: Box<Instr>,
        name: String,
        value: Box<Instr>,
    },
    /// `send-to-all-neighbours name value`
    SendToAllNeighbours { name: String, value: Box<Instr> },
    ThisVertexId,
    ThisOutboundEdges,
    ThisDoc,
    GlobalSuperstep,
    Phase,
    /// `attrib-ref path doc`
    AttribRef { path: Vec<String>, doc: Box<Instr> },
    /// `var-ref name`
    VarRef(String),
    Arith(ArithOp, Vec<Instr>),
    Compare(CmpOp, Box<Instr>, Box<Instr>),
    And(Vec<Instr>),
    Or(Vec<Instr>),
    Not(Box<Instr>),
    List(Vec<Instr>),
    Length(Box<Instr>),
    VoteActive,
    VoteHalt,
}

impl Instr {
    /// Decode a JSON program
    pub fn decode(program: &Value) -> Result<Self, ProgramError> {
        match program {
            Value::Array(items) => match items.split_first() {
                None => Ok(Instr::Literal(Value::Array(Vec::new()))),
                Some((Value::String(tag), args)) => decode_form(tag, args),
                Some((head, _)) => Err(ProgramError::malformed(format!(
                    "instruction tag must be a string, found {}",
                    value::type_name(head)
                ))),
            },
            other => Ok(Instr::Literal(other.clone())),
        }
    }

    /// Instruction tag, for diagnostics
    pub fn tag(&self) -> &'static str {
        match self {
            Instr::Literal(_) => "quote",
            Instr::Seq(_) => "seq",
            Instr::If(_) => "if",
            Instr::ForEach { .. } => "for-each",
            Instr::Let { .. } => "let",
            Instr::AccumSet { .. } => "accum-set!",
            Instr::AccumClear { .. } => "accum-clear!",
            Instr::AccumRef { .. } => "accum-ref",
            Instr::SendToAccum { .. } => "send-to-accum",
            Instr::SendToAllNeighbours { .. } => "send-to-all-neighbours",
            Instr::ThisVertexId => "this-vertex-id",
            Instr::ThisOutboundEdges => "this-outbound-edges",
            Instr::ThisDoc => "this-doc",
            Instr::GlobalSuperstep => "global-superstep",
            Instr::Phase => "phase",
            Instr::AttribRef { .. } => "attrib-ref",
            Instr::VarRef(_) => "var-ref",
            Instr::Arith(op, _) => match op {
                ArithOp::Add => "+",
                ArithOp::Sub => "-",
                ArithOp::Mul => "*",
                ArithOp::Div => "/",
                ArithOp::Rem => "%",
            },
            Instr::Compare(op, _, _) => match op {
                CmpOp::Eq => "eq?",
                CmpOp::Ne => "ne?",
                CmpOp::Lt => "lt?",
                CmpOp::Le => "le?",
                CmpOp::Gt => "gt?",
                CmpOp::Ge => "ge?",
            },
            Instr::And(_) => "and",
            Instr::Or(_) => "or",
            Instr::Not(_) => "not",
            Instr::List(_) => "list",
            Instr::Length(_) => "length",
            Instr::VoteActive => "vote-active",
            Instr::VoteHalt => "vote-halt",
        }
    }

    /// Visit this instruction and all nested ones, depth first
    pub fn walk(&self, visit: &mut impl FnMut(&Instr)) {
        visit(self);
        match self {
            Instr::Seq(items)
            | Instr::Arith(_, items)
            | Instr::And(items)
            | Instr::Or(items)
            | Instr::List(items) => items.iter().for_each(|i| i.walk(visit)),
            Instr::If(clauses) => {
                for (cond, then) in clauses {
                    cond.walk(visit);
                    then.walk(visit);
                }
            }
            Instr::ForEach { bindings, body } | Instr::Let { bindings, body } => {
                bindings.iter().for_each(|(_, expr)| expr.walk(visit));
                body.iter().for_each(|i| i.walk(visit));
            }
            Instr::AccumSet { value, .. } | Instr::SendToAllNeighbours { value, .. } => {
                value.walk(visit)
            }
            Instr::SendToAccum { target, value, .. } => {
                target.walk(visit);
                value.walk(visit);
            }
            Instr::AttribRef { doc, .. } => doc.walk(visit),
            Instr::Compare(_, lhs, rhs) => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Instr::Not(inner) | Instr::Length(inner) => inner.walk(visit),
            Instr::Literal(_)
            | Instr::AccumClear { .. }
            | Instr::AccumRef { .. }
            | Instr::ThisVertexId
            | Instr::ThisOutboundEdges
            | Instr::ThisDoc
            | Instr::GlobalSuperstep
            | Instr::Phase
            | Instr::VarRef(_)
            | Instr::VoteActive
            | Instr::VoteHalt => {}
        }
    }

    /// Accumulator names referenced anywhere in the program
    pub fn accumulator_refs(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.walk(&mut |instr| match instr {
            Instr::AccumSet { name, .. }
            | Instr::AccumClear { name }
            | Instr::AccumRef { name }
            | Instr::SendToAccum { name, .. }
            | Instr::SendToAllNeighbours { name, .. } => {
                names.insert(name.clone());
            }
            _ => {}
        });
        names
    }
}

fn decode_form(tag: &str, args: &[Value]) -> Result<Instr, ProgramError> {
    let instr = match tag {
        "quote" => {
            exact(tag, args, 1)?;
            Instr::Literal(args[0].clone())
        }
        "seq" => Instr::Seq(decode_all(args)?),
        "if" => Instr::If(
            args.iter()
                .map(decode_clause)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        "for-each" => {
            at_least(tag, args, 1)?;
            Instr::ForEach {
                bindings: decode_bindings(tag, &args[0])?,
                body: decode_all(&args[1..])?,
            }
        }
        "let" => {
            at_least(tag, args, 1)?;
            Instr::Let {
                bindings: decode_bindings(tag, &args[0])?,
                body: decode_all(&args[1..])?,
            }
        }
        "accum-set!" => {
            exact(tag, args, 2)?;
            Instr::AccumSet {
                name: accumulator_name(tag, &args[0])?,
                value: Box::new(Instr::decode(&args[1])?),
            }
        }
        "accum-clear!" => {
            exact(tag, args, 1)?;
            Instr::AccumClear {
                name: accumulator_name(tag, &args[0])?,
            }
        }
        "accum-ref" => {
            exact(tag, args, 1)?;
            Instr::AccumRef {
                name: accumulator_name(tag, &args[0])?,
            }
        }
        "send-to-accum" => {
            exact(tag, args, 3)?;
            Instr::SendToAccum {
                target: Box::new(Instr::decode(&args[0])?),
                name: accumulator_name(tag, &args[1])?,
                value: Box::new(Instr::decode(&args[2])?),
            }
        }
        "send-to-all-neighbours" | "send-to-all-neighbors" => {
            exact(tag, args, 2)?;
            Instr::SendToAllNeighbours {
                name: accumulator_name(tag, &args[0])?,
                value: Box::new(Instr::decode(&args[1])?),
            }
        }
        "this-vertex-id" => nullary(tag, args, Instr::ThisVertexId)?,
        "this-outbound-edges" => nullary(tag, args, Instr::ThisOutboundEdges)?,
        "this-doc" => nullary(tag, args, Instr::ThisDoc)?,
        "global-superstep" => nullary(tag, args, Instr::GlobalSuperstep)?,
        "phase" => nullary(tag, args, Instr::Phase)?,
        "vote-active" => nullary(tag, args, Instr::VoteActive)?,
        "vote-halt" => nullary(tag, args, Instr::VoteHalt)?,
        "attrib-ref" => {
            exact(tag, args, 2)?;
            Instr::AttribRef {
                path: attribute_path(&args[0])?,
                doc: Box::new(Instr::decode(&args[1])?),
            }
        }
        "var-ref" => {
            exact(tag, args, 1)?;
            match &args[0] {
                Value::String(name) => Instr::VarRef(name.clone()),
                other => {
                    return Err(ProgramError::type_mismatch(
                        tag,
                        "variable name",
                        value::type_name(other),
                    ))
                }
            }
        }
        "+" => Instr::Arith(ArithOp::Add, decode_all(args)?),
        "*" => Instr::Arith(ArithOp::Mul, decode_all(args)?),
        "-" => {
            at_least(tag, args, 1)?;
            Instr::Arith(ArithOp::Sub, decode_all(args)?)
        }
        "/" => {
            at_least(tag, args, 2)?;
            Instr::Arith(ArithOp::Div, decode_all(args)?)
        }
        "%" => {
            exact(tag, args, 2)?;
            Instr::Arith(ArithOp::Rem, decode_all(args)?)
        }
        "eq?" | "==" => binary(tag, args, CmpOp::Eq)?,
        "ne?" | "!=" => binary(tag, args, CmpOp::Ne)?,
        "lt?" | "<" => binary(tag, args, CmpOp::Lt)?,
        "le?" | "<=" => binary(tag, args, CmpOp::Le)?,
        "gt?" | ">" => binary(tag, args, CmpOp::Gt)?,
        "ge?" | ">=" => binary(tag, args, CmpOp::Ge)?,
        "and" => Instr::And(decode_all(args)?),
        "or" => Instr::Or(decode_all(args)?),
        "not" => {
            exact(tag, args, 1)?;
            Instr::Not(Box::new(Instr::decode(&args[0])?))
        }
        "list" => Instr::List(decode_all(args)?),
        "length" => {
            exact(tag, args, 1)?;
            Instr::Length(Box::new(Instr::decode(&args[0])?))
        }
        other => return Err(ProgramError::UnknownInstruction(other.to_string())),
    };
    Ok(instr)
}

fn exact(tag: &str, args: &[Value], expected: usize) -> Result<(), ProgramError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ProgramError::arity(tag, expected.to_string(), args.len()))
    }
}

fn at_least(tag: &str, args: &[Value], minimum: usize) -> Result<(), ProgramError> {
    if args.len() >= minimum {
        Ok(())
    } else {
        Err(ProgramError::arity(tag, format!("at least {}", minimum), args.len()))
    }
}

fn nullary(tag: &str, args: &[Value], instr: Instr) -> Result<Instr, ProgramError> {
    exact(tag, args, 0)?;
    Ok(instr)
}

fn binary(tag: &str, args: &[Value], op: CmpOp) -> Result<Instr, ProgramError> {
    exact(tag, args, 2)?;
    Ok(Instr::Compare(
        op,
        Box::new(Instr::decode(&args[0])?),
        Box::new(Instr::decode(&args[1])?),
    ))
}

fn decode_all(args: &[Value]) -> Result<Vec<Instr>, ProgramError> {
    args.iter().map(Instr::decode).collect()
}

fn decode_clause(clause: &Value) -> Result<(Instr, Instr), ProgramError> {
    match clause {
        Value::Array(pair) if pair.len() == 2 => {
            Ok((Instr::decode(&pair[0])?, Instr::decode(&pair[1])?))
        }
        _ => Err(ProgramError::malformed(
            "'if' clauses must be [condition, expression] pairs",
        )),
    }
}

/// `[var, expr]` or `[[var, expr], ...]`
fn decode_bindings(tag: &str, bindings: &Value) -> Result<Vec<(String, Instr)>, ProgramError> {
    let Value::Array(items) = bindings else {
        return Err(ProgramError::malformed(format!(
            "'{}' bindings must be a list",
            tag
        )));
    };
    if matches!(items.first(), Some(Value::String(_))) {
        return Ok(vec![decode_binding(tag, bindings)?]);
    }
    items.iter().map(|item| decode_binding(tag, item)).collect()
}

fn decode_binding(tag: &str, binding: &Value) -> Result<(String, Instr), ProgramError> {
    match binding {
        Value::Array(pair) if pair.len() == 2 => match &pair[0] {
            Value::String(name) => Ok((name.clone(), Instr::decode(&pair[1])?)),
            other => Err(ProgramError::type_mismatch(
                tag,
                "variable name",
                value::type_name(other),
            )),
        },
        _ => Err(ProgramError::malformed(format!(
            "'{}' binding must be a [name, expression] pair",
            tag
        ))),
    }
}

/// Accumulator names are literal strings, optionally quoted
fn accumulator_name(tag: &str, arg: &Value) -> Result<String, ProgramError> {
    match arg {
        Value::String(name) => Ok(name.clone()),
        Value::Array(items) if items.len() == 2 && items[0] == "quote" => {
            accumulator_name(tag, &items[1])
        }
        other => Err(ProgramError::type_mismatch(
            tag,
            "literal accumulator name",
            value::type_name(other),
        )),
    }
}

/// `"key"`, `["a", "b"]` or `["quote", ...]` of either
fn attribute_path(arg: &Value) -> Result<Vec<String>, ProgramError> {
    match arg {
        Value::String(key) => Ok(vec![key.clone()]),
        Value::Array(items) if items.len() == 2 && items[0] == "quote" => {
            attribute_path(&items[1])
        }
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(key) => Ok(key.clone()),
                other => Err(ProgramError::type_mismatch(
                    "attrib-ref",
                    "string path element",
                    value::type_name(other),
                )),
            })
            .collect(),
        other => Err(ProgramError::type_mismatch(
            "attrib-ref",
            "attribute path",
            value::type_name(other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_literals() {
        assert_eq!(Instr::decode(&json!(3)).unwrap(), Instr::Literal(json!(3)));
        assert_eq!(
            Instr::decode(&json!(["quote", [1, 2]])).unwrap(),
            Instr::Literal(json!([1, 2]))
        );
        assert_eq!(Instr::decode(&json!([])).unwrap(), Instr::Literal(json!([])));
    }

    #[test]
    fn test_decode_shortest_path_update() {
        let program = json!(["for-each", ["edge", ["this-outbound-edges"]],
            ["send-to-accum",
                ["attrib-ref", "_to", ["var-ref", "edge"]],
                "distance",
                ["+", ["accum-ref", "distance"], 1]]]);

        let instr = Instr::decode(&program).unwrap();
        match &instr {
            Instr::ForEach { bindings, body } => {
                assert_eq!(bindings.len(), 1);
                assert_eq!(bindings[0].0, "edge");
                assert_eq!(bindings[0].1, Instr::ThisOutboundEdges);
                assert_eq!(body.len(), 1);
                assert_eq!(body[0].tag(), "send-to-accum");
            }
            other => panic!("unexpected instruction {:?}", other),
        }
        assert_eq!(
            instr.accumulator_refs().into_iter().collect::<Vec<_>>(),
            vec!["distance".to_string()]
        );
    }

    #[test]
    fn test_decode_if_clauses() {
        let program = json!(["if",
            [["eq?", ["this-vertex-id"], "a"], ["accum-set!", "d", 0]],
            [true, ["accum-clear!", "d"]]]);
        match Instr::decode(&program).unwrap() {
            Instr::If(clauses) => {
                assert_eq!(clauses.len(), 2);
                assert_eq!(clauses[0].0.tag(), "eq?");
                assert_eq!(clauses[1].0, Instr::Literal(json!(true)));
            }
            other => panic!("unexpected instruction {:?}", other),
        }
    }

    #[test]
    fn test_decode_multiple_bindings() {
        let program = json!(["let", [["x", 1], ["y", 2]], ["+", ["var-ref", "x"], ["var-ref", "y"]]]);
        match Instr::decode(&program).unwrap() {
            Instr::Let { bindings, body } => {
                assert_eq!(bindings.len(), 2);
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected instruction {:?}", other),
        }
    }

    #[test]
    fn test_unknown_instruction() {
        let err = Instr::decode(&json!(["launch-missiles"])).unwrap_err();
        assert_eq!(err, ProgramError::UnknownInstruction("launch-missiles".into()));
    }

    #[test]
    fn test_arity_mismatch() {
        let err = Instr::decode(&json!(["accum-set!", "distance"])).unwrap_err();
        assert_eq!(err, ProgramError::arity("accum-set!", "2", 1));

        let err = Instr::decode(&json!(["this-vertex-id", 1])).unwrap_err();
        assert!(matches!(err, ProgramError::Arity { .. }));
    }

    #[test]
    fn test_accumulator_name_must_be_literal() {
        let err = Instr::decode(&json!(["accum-ref", ["this-vertex-id"]])).unwrap_err();
        assert!(matches!(err, ProgramError::TypeMismatch { .. }));

        let quoted = Instr::decode(&json!(["accum-ref", ["quote", "rank"]])).unwrap();
        assert_eq!(quoted, Instr::AccumRef { name: "rank".into() });
    }

    #[test]
    fn test_non_string_head_is_malformed() {
        let err = Instr::decode(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ProgramError::Malformed(_)));
    }

    #[test]
    fn test_nested_errors_surface() {
        let err = Instr::decode(&json!(["seq", ["if", ["oops"]]])).unwrap_err();
        assert!(matches!(err, ProgramError::Malformed(_)));
    }

    #[test]
    fn test_attribute_paths() {
        let nested = Instr::decode(&json!(["attrib-ref", ["meta", "weight"], ["this-doc"]])).unwrap();
        assert_eq!(
            nested,
            Instr::AttribRef {
                path: vec!["meta".into(), "weight".into()],
                doc: Box::new(Instr::ThisDoc),
            }
        );
    }
}
