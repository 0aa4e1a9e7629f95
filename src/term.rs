//! The term model: an immutable tagged tree that every expression sent to the server is built
//! from, and its JSON marshal/parse rules.

mod value;

use std::{collections::BTreeMap, fmt};

pub use value::Value;

use crate::proto::TermType;

/// An expression node. A `Term` is either a datum leaf (a JSON-representable value with no
/// further structure) or a compound node: a term-type tag, an ordered list of child terms, and
/// an optional mapping of option name to child term.
///
/// `Term` values are immutable once constructed and are cheap to compare structurally, which is
/// what the round-trip property ("parse(marshal(T)) produces an equivalent tree") exercises.
#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    /// A raw datum leaf: null, a boolean, a number, a string, or any other JSON-representable
    /// value passed straight through without interpretation.
    Datum(Value),
    /// A compound node: `type`, `args` (always present, even when empty), and `opts` (omitted
    /// from the wire form entirely when empty).
    Op {
        term_type: i64,
        args: Vec<Term>,
        opts: BTreeMap<String, Term>,
    },
}

impl Term {
    /// Builds a datum leaf from anything with a natural JSON representation.
    pub fn datum(value: impl Into<Value>) -> Self {
        Term::Datum(value.into())
    }

    /// Builds a compound term from a raw term-type tag. Each argument is coerced via
    /// [`Into<Term>`]: a bare value becomes a datum leaf, and an existing `Term` passes through
    /// unchanged.
    pub fn op(
        term_type: impl Into<i64>,
        args: impl IntoIterator<Item = impl Into<Term>>,
        opts: impl IntoIterator<Item = (impl Into<String>, impl Into<Term>)>,
    ) -> Self {
        Term::Op {
            term_type: term_type.into(),
            args: args.into_iter().map(Into::into).collect(),
            opts: opts
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Builds an array-literal term (`MAKE_ARRAY`, type 2). Array literals are always a compound
    /// term; a raw JSON array may still be constructed as a datum via [`Term::datum`], but doing
    /// so is a protocol error once it reaches the server.
    pub fn array(items: impl IntoIterator<Item = impl Into<Term>>) -> Self {
        Term::op(TermType::MakeArray.as_i64(), items, Vec::<(String, Term)>::new())
    }

    /// `DB("name")`, used both as a standalone convenience constructor and by the query builder's
    /// `db` option promotion.
    pub fn db(name: impl Into<String>) -> Self {
        Term::op(TermType::Db.as_i64(), [Term::datum(name.into())], Vec::<(String, Term)>::new())
    }

    /// `TABLE(name)` against this term (typically a `db` term).
    pub fn table(self, name: impl Into<String>) -> Self {
        Term::op(TermType::Table.as_i64(), [self, Term::datum(name.into())], Vec::<(String, Term)>::new())
    }

    /// `GET(key)` against this term (typically a table term).
    pub fn get(self, key: impl Into<Value>) -> Self {
        Term::op(TermType::Get.as_i64(), [self, Term::datum(key)], Vec::<(String, Term)>::new())
    }

    /// `FILTER(predicate)` against this term.
    pub fn filter(self, predicate: impl Into<Term>) -> Self {
        Term::op(
            TermType::Filter.as_i64(),
            [self, predicate.into()],
            Vec::<(String, Term)>::new(),
        )
    }

    /// `INSERT(documents)` against this term (typically a table term).
    pub fn insert(self, documents: impl Into<Term>) -> Self {
        Term::op(
            TermType::Insert.as_i64(),
            [self, documents.into()],
            Vec::<(String, Term)>::new(),
        )
    }

    pub fn term_type(&self) -> Option<i64> {
        match self {
            Term::Op { term_type, .. } => Some(*term_type),
            Term::Datum(_) => None,
        }
    }

    pub fn as_datum(&self) -> Option<&Value> {
        match self {
            Term::Datum(value) => Some(value),
            Term::Op { .. } => None,
        }
    }

    /// Serializes this term to its wire JSON form: a datum leaf passes through as raw JSON, and a
    /// compound node becomes `[type, args]` when its options are empty, or `[type, args, opts]`
    /// otherwise. `args` is always a JSON array, never omitted or null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Term::Datum(value) => value.to_json(),
            Term::Op {
                term_type,
                args,
                opts,
            } => {
                let args_json: Vec<serde_json::Value> = args.iter().map(Term::to_json).collect();
                if opts.is_empty() {
                    serde_json::json!([term_type, args_json])
                } else {
                    let opts_json: serde_json::Map<String, serde_json::Value> = opts
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect();
                    serde_json::json!([term_type, args_json, opts_json])
                }
            }
        }
    }

    /// Parses a wire JSON value back into a term tree. A two- or three-element array whose first
    /// element is an integer and whose second is an array is interpreted as a compound node;
    /// everything else becomes a datum leaf. This is the inverse of [`Term::to_json`], used for
    /// the round-trip invariant — it is not a source-syntax parser, which turns human-written
    /// expressions into terms rather than re-reading this crate's own wire form.
    pub fn from_json(value: serde_json::Value) -> Self {
        if let serde_json::Value::Array(ref outer) = value {
            if let (Some(serde_json::Value::Number(n)), Some(serde_json::Value::Array(args))) =
                (outer.first(), outer.get(1))
            {
                if let Some(term_type) = n.as_i64() {
                    let args: Vec<Term> = args.iter().cloned().map(Term::from_json).collect();
                    let opts = match outer.get(2) {
                        Some(serde_json::Value::Object(map)) => map
                            .iter()
                            .map(|(k, v)| (k.clone(), Term::from_json(v.clone())))
                            .collect(),
                        _ => BTreeMap::new(),
                    };
                    if outer.len() <= 3 {
                        return Term::Op {
                            term_type,
                            args,
                            opts,
                        };
                    }
                }
            }
        }
        Term::Datum(Value::from_json(value))
    }
}

macro_rules! impl_from_datum {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Term {
                fn from(value: $ty) -> Self {
                    Term::datum(value)
                }
            }
        )+
    };
}

impl_from_datum!(
    Value, bool, &str, String, f64, i8, i16, i32, i64, u8, u16, u32, u64
);

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Datum(value) => write!(f, "{}", value.to_json()),
            Term::Op {
                term_type, args, ..
            } => {
                write!(f, "op[{}](", term_type)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datum_marshals_as_raw_json() {
        assert_eq!(Term::datum(5_i64).to_json(), serde_json::json!(5));
        assert_eq!(Term::datum("x").to_json(), serde_json::json!("x"));
        assert_eq!(Term::datum(Value::Null).to_json(), serde_json::json!(null));
    }

    #[test]
    fn compound_omits_opts_when_empty() {
        let term = Term::db("test");
        assert_eq!(term.to_json(), serde_json::json!([14, ["test"]]));
    }

    #[test]
    fn compound_includes_opts_when_present() {
        let term = Term::op(39_i64, [Term::datum(1_i64)], [("foo", Term::datum(true))]);
        assert_eq!(term.to_json(), serde_json::json!([39, [1], {"foo": true}]));
    }

    #[test]
    fn array_literal_is_a_compound_make_array_term() {
        let term = Term::array([1_i64, 2, 3]);
        assert_eq!(term.to_json(), serde_json::json!([2, [1, 2, 3]]));
        assert_ne!(term, Term::datum(Value::from(vec![1_i64, 2, 3])));
    }

    #[test]
    fn parse_of_marshal_round_trips() {
        let term = Term::db("test")
            .table("users")
            .filter(Term::op(39_i64, [Term::datum(true)], Vec::<(String, Term)>::new()));
        let round_tripped = Term::from_json(term.to_json());
        assert_eq!(term, round_tripped);
    }

    #[test]
    fn builder_helpers_coerce_bare_values_into_datums() {
        let term = Term::db("test").table("users").get(42_i64);
        match term {
            Term::Op { args, .. } => match &args[1] {
                Term::Datum(Value::Number(n)) => assert_eq!(n.as_i64(), Some(42)),
                other => panic!("expected coerced datum, got {other:?}"),
            },
            other => panic!("expected compound term, got {other:?}"),
        }
    }
}
