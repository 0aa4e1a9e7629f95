//! Runs a single query against a connection and turns the server's response into the right
//! cursor shape.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{
    conn::Connection,
    context::Context,
    cursor::Cursor,
    error::{Error, Result},
    proto::{QueryType, ResponseType},
    query,
    response::Response,
    term::Term,
};

/// The typed payload of a `SERVER_INFO` response, decoded from the atom result instead of leaving
/// callers to pick fields out of raw JSON.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub proxy: bool,
    pub version: String,
}

/// The outcome of [`run`]: either a cursor over the query's results, or nothing at all when the
/// query was sent with `noreply: true`.
pub enum RunOutcome {
    Cursor(Cursor),
    NoReply,
}

/// Whether `opts` requested `noreply: true`.
fn is_noreply(opts: Option<&BTreeMap<String, Term>>) -> bool {
    opts.and_then(|opts| opts.get("noreply"))
        .and_then(Term::as_datum)
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

/// Runs a query: allocates a token, sends `START`, and classifies the response. `noreply` queries
/// return [`RunOutcome::NoReply`] without waiting on a response at all, since the server
/// suppresses it.
pub async fn run(
    ctx: &Context,
    conn: &Connection,
    term: &Term,
    opts: Option<&BTreeMap<String, Term>>,
) -> Result<RunOutcome> {
    let token = conn.next_token();
    let envelope = query::build_query(QueryType::Start, Some(term), opts)?;
    let payload = serde_json::to_vec(&envelope)?;

    if is_noreply(opts) {
        fire_and_forget(ctx, conn, token, &payload).await?;
        return Ok(RunOutcome::NoReply);
    }

    let raw = conn.send(ctx, token, &payload).await?;
    let response = Response::parse(&raw)?;
    if response.is_error() {
        conn.forget(token).await;
        return Err(response.into_error());
    }

    let cursor_ctx = ctx.with_cancel();
    let cursor = match response.response_type {
        ResponseType::Atom
        | ResponseType::Sequence
        | ResponseType::WaitComplete
        | ResponseType::ServerInfo => {
            conn.forget(token).await;
            Cursor::terminal(conn.clone(), token, cursor_ctx, response.results)
        }
        ResponseType::Partial if response.is_feed() => {
            Cursor::changefeed(conn.clone(), token, cursor_ctx, response.results)
        }
        ResponseType::Partial => {
            Cursor::streaming(conn.clone(), token, cursor_ctx, response.results)
        }
        ResponseType::ClientError | ResponseType::CompileError | ResponseType::RuntimeError => {
            unreachable!("error responses are handled by the is_error() check above")
        }
    };

    Ok(RunOutcome::Cursor(cursor))
}

/// Sends a `noreply` `START` without registering a dispatch channel to wait on, since the server
/// is not going to reply.
async fn fire_and_forget(ctx: &Context, conn: &Connection, token: crate::query::Token, payload: &[u8]) -> Result<()> {
    // `Connection::send` always waits for a reply, which a noreply query never gets. Use a
    // context that's already canceled immediately after the write lands on the wire, so the
    // wait resolves instantly rather than hanging until the connection closes; the allocated
    // token is left unregistered in the dispatch map, so a spurious reply (there shouldn't be
    // one) is simply dropped by the reader.
    let local = ctx.with_cancel();
    local.cancel();
    match conn.send(&local, token, payload).await {
        Ok(_) => Ok(()),
        Err(err) if err.is_canceled() => Ok(()),
        Err(err) => Err(err),
    }
}

/// Sends the `SERVER_INFO` envelope and decodes its atom payload into a [`ServerInfo`].
pub async fn server_info(ctx: &Context, conn: &Connection) -> Result<ServerInfo> {
    let token = conn.next_token();
    let envelope = query::build_bare_query(QueryType::ServerInfo);
    let payload = serde_json::to_vec(&envelope)?;
    let raw = conn.send(ctx, token, &payload).await?;
    conn.forget(token).await;
    let response = Response::parse(&raw)?;
    let response = response.into_result()?;
    let payload = response
        .results
        .into_iter()
        .next()
        .ok_or_else(|| Error::unexpected_response("SERVER_INFO response carried no result"))?;
    Ok(serde_json::from_value(payload)?)
}

/// Sends `NOREPLY_WAIT`: blocks until every outstanding `noreply` query on this connection has
/// completed server-side.
pub async fn noreply_wait(ctx: &Context, conn: &Connection) -> Result<()> {
    let token = conn.next_token();
    let envelope = query::build_bare_query(QueryType::NoreplyWait);
    let payload = serde_json::to_vec(&envelope)?;
    let raw = conn.send(ctx, token, &payload).await?;
    conn.forget(token).await;
    Response::parse(&raw)?.into_result()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_noreply_reads_the_noreply_option() {
        let mut opts = BTreeMap::new();
        opts.insert("noreply".to_owned(), Term::datum(true));
        assert!(is_noreply(Some(&opts)));

        opts.insert("noreply".to_owned(), Term::datum(false));
        assert!(!is_noreply(Some(&opts)));

        assert!(!is_noreply(None));
    }

    #[test]
    fn server_info_deserializes_from_the_atom_payload() {
        let payload = serde_json::json!({
            "id": "abc123",
            "name": "node1",
            "proxy": false,
            "version": "1.0.0",
        });
        let info: ServerInfo = serde_json::from_value(payload).unwrap();
        assert_eq!(info.id, "abc123");
        assert_eq!(info.name, "node1");
        assert!(!info.proxy);
        assert_eq!(info.version, "1.0.0");
    }
}
