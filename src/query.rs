//! The query envelope builder: wraps a [`Term`] and its options into the three-shape structure
//! the server expects.

use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    proto::QueryType,
    term::Term,
};

/// Monotonically increasing identifier assigned per `START` by the connection. CONTINUE/STOP for
/// a cursor reuse its START token.
pub type Token = u64;

/// Builds the JSON array sent over the wire for a given query type:
///
/// - `Continue`/`Stop`/`NoreplyWait`/`ServerInfo` marshal as a single-element array `[<n>]`.
/// - `Start` marshals as `[1, <term>, <opts>]`, where the `db` option is promoted from a bare
///   string to a `DB` term if present, and every other option passes through unchanged.
///
/// Any other query type is rejected as [`crate::error::ErrorKind::Unsupported`]; the enum
/// `QueryType` only has the five wire-recognized variants, so this can only happen through an
/// explicit out-of-range construction and exists to keep the function total.
pub fn build_query(
    query_type: QueryType,
    term: Option<&Term>,
    opts: Option<&BTreeMap<String, Term>>,
) -> Result<serde_json::Value> {
    match query_type {
        QueryType::Continue | QueryType::Stop | QueryType::NoreplyWait | QueryType::ServerInfo => {
            Ok(serde_json::json!([query_type.as_i64()]))
        }
        QueryType::Start => {
            let term = term.ok_or_else(|| {
                Error::unsupported("START requires a term".to_owned())
            })?;
            let opts_json = build_start_opts(opts);
            Ok(serde_json::json!([
                QueryType::Start.as_i64(),
                term.to_json(),
                opts_json
            ]))
        }
    }
}

/// Builds the `CONTINUE`/`STOP`/`NOREPLY_WAIT`/`SERVER_INFO` envelopes, which carry no term or
/// options. Kept separate from [`build_query`] so cursor and executor call sites that only ever
/// send these shapes don't need to thread `None, None` through.
pub fn build_bare_query(query_type: QueryType) -> serde_json::Value {
    serde_json::json!([query_type.as_i64()])
}

fn build_start_opts(opts: Option<&BTreeMap<String, Term>>) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    if let Some(opts) = opts {
        for (key, value) in opts {
            if key == "db" {
                if let Some(name) = value.as_datum().and_then(|v| v.as_str()) {
                    object.insert(key.clone(), Term::db(name).to_json());
                    continue;
                }
            }
            object.insert(key.clone(), value.to_json());
        }
    }
    serde_json::Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continue_and_stop_marshal_as_single_element_arrays() {
        assert_eq!(build_bare_query(QueryType::Continue), serde_json::json!([2]));
        assert_eq!(build_bare_query(QueryType::Stop), serde_json::json!([3]));
        assert_eq!(
            build_bare_query(QueryType::NoreplyWait),
            serde_json::json!([4])
        );
        assert_eq!(
            build_bare_query(QueryType::ServerInfo),
            serde_json::json!([5])
        );
    }

    #[test]
    fn start_promotes_bare_db_string_opt_to_a_db_term() {
        let term = Term::db("test").table("users");
        let mut opts = BTreeMap::new();
        opts.insert("db".to_owned(), Term::datum("x"));
        let envelope = build_query(QueryType::Start, Some(&term), Some(&opts)).unwrap();
        assert_eq!(
            envelope,
            serde_json::json!([1, [15, [[14, ["test"]], "users"]], {"db": [14, ["x"]]}])
        );
    }

    #[test]
    fn start_passes_through_non_db_opts_unchanged() {
        let term = Term::db("test").table("users");
        let mut opts = BTreeMap::new();
        opts.insert("durability".to_owned(), Term::datum("soft"));
        let envelope = build_query(QueryType::Start, Some(&term), Some(&opts)).unwrap();
        let opts_obj = envelope.as_array().unwrap()[2].clone();
        assert_eq!(opts_obj, serde_json::json!({"durability": "soft"}));
    }

    #[test]
    fn start_without_a_term_is_rejected() {
        let result = build_query(QueryType::Start, None, None);
        assert!(result.is_err());
    }
}
