//! Connection configuration: a `typed_builder::TypedBuilder` struct with defaulted fields rather
//! than a hand-rolled builder.

use std::{fmt, time::Duration};

use derivative::Derivative;
use typed_builder::TypedBuilder;

fn default_host() -> String {
    "localhost".to_owned()
}

const fn default_port() -> u16 {
    28015
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_username() -> String {
    "admin".to_owned()
}

fn default_password() -> String {
    String::new()
}

/// Everything needed to dial and authenticate a connection.
#[derive(Clone, Derivative, TypedBuilder)]
#[derivative(Debug)]
pub struct ConnectOptions {
    /// Hostname or IP address to dial.
    #[builder(default = default_host())]
    pub host: String,

    /// TCP port to dial.
    #[builder(default = default_port())]
    pub port: u16,

    /// The database a bare table reference is resolved against, when a query doesn't specify one
    /// itself.
    #[builder(default, setter(strip_option))]
    pub db: Option<String>,

    /// SCRAM username.
    #[builder(default = default_username())]
    pub username: String,

    /// SCRAM password.
    #[builder(default = default_password())]
    #[derivative(Debug = "ignore")]
    pub password: String,

    /// Upper bound on how long dialing and the handshake are allowed to take.
    #[builder(default = default_connect_timeout())]
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Display for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_point_at_localhost_28015() {
        let opts = ConnectOptions::default();
        assert_eq!(opts.host, "localhost");
        assert_eq!(opts.port, 28015);
        assert_eq!(opts.db, None);
    }

    #[test]
    fn debug_output_omits_the_password() {
        let opts = ConnectOptions::builder().password("hunter2".to_owned()).build();
        assert!(!format!("{opts:?}").contains("hunter2"));
    }

    #[test]
    fn builder_overrides_individual_fields() {
        let opts = ConnectOptions::builder()
            .host("db.internal".to_owned())
            .port(28016)
            .db("test".to_owned())
            .build();
        assert_eq!(opts.host, "db.internal");
        assert_eq!(opts.port, 28016);
        assert_eq!(opts.db.as_deref(), Some("test"));
        assert_eq!(opts.to_string(), "db.internal:28016");
    }
}
