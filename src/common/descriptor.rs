//! Service descriptors: the registry record for one shard or API node
//!
//! Descriptors travel in two shapes: as JSON documents in the `services`
//! collection of every heartbeat shard, and as the colon-packed string that
//! operators pass to the bootstrap endpoint:
//!
//! ```text
//! publicAddr:privateAddr:port:account:passwordEncoded:shardGroup:identity
//! ```

use crate::common::utils::{decode_component, encode_component, timestamp_now_millis};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    DataShard,
    HeartbeatShard,
    ApiNode,
}

/// Replica identity within a shard group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Identity {
    #[default]
    Master,
    Servant,
}

impl std::str::FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "master" => Ok(Identity::Master),
            "servant" => Ok(Identity::Servant),
            other => Err(Error::InvalidDescriptor(format!(
                "identity must be master or servant, got {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Up,
    Down,
    #[default]
    Pending,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Up => write!(f, "up"),
            Health::Down => write!(f, "down"),
            Health::Pending => write!(f, "pending"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Borrowed view of the fields that make up endpoint identity.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint<'a> {
    pub private_addr: Option<&'a str>,
    pub public_addr: Option<&'a str>,
    pub port: u16,
}

/// Endpoint identity predicate used for merging and eviction.
///
/// Intentionally permissive: two endpoints are the same when their ports are
/// equal and *either* their private addresses or their public addresses are
/// equal. A shard reachable under either address therefore matches itself.
pub fn endpoints_match(a: &Endpoint<'_>, b: &Endpoint<'_>) -> bool {
    fn same(x: Option<&str>, y: Option<&str>) -> bool {
        matches!((x, y), (Some(x), Some(y)) if !x.is_empty() && x == y)
    }

    a.port == b.port
        && (same(a.private_addr, b.private_addr) || same(a.public_addr, b.public_addr))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub public_addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_addr: Option<String>,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    pub kind: ServiceKind,
    #[serde(default)]
    pub shard_group: u32,
    #[serde(default)]
    pub identity: Identity,
    #[serde(default)]
    pub health: Health,
    /// Unix milliseconds of the last change to this record
    #[serde(default)]
    pub last_edit: i64,
}

impl ServiceDescriptor {
    /// Descriptor for an API node, stamped now.
    pub fn api_node(public_addr: &str, private_addr: Option<&str>, port: u16) -> Self {
        Self {
            public_addr: public_addr.to_string(),
            private_addr: private_addr
                .filter(|a| !a.is_empty())
                .map(str::to_string),
            port,
            credentials: None,
            kind: ServiceKind::ApiNode,
            shard_group: 0,
            identity: Identity::Master,
            health: Health::Up,
            last_edit: timestamp_now_millis(),
        }
    }

    /// Parse a colon-packed descriptor string.
    ///
    /// Never panics: every malformed field is reported as
    /// [`Error::InvalidDescriptor`].
    pub fn parse_packed(raw: &str, kind: ServiceKind) -> Result<Self> {
        let fields: Vec<&str> = raw.trim().split(':').collect();
        if fields.len() != 7 {
            return Err(Error::InvalidDescriptor(format!(
                "expected 7 colon-separated fields, got {}",
                fields.len()
            )));
        }

        let public_addr = fields[0].trim();
        if public_addr.is_empty() {
            return Err(Error::InvalidDescriptor("public address is empty".into()));
        }
        let private_addr = Some(fields[1].trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        let port: u16 = fields[2]
            .parse()
            .map_err(|_| Error::InvalidDescriptor(format!("invalid port {:?}", fields[2])))?;
        if port == 0 {
            return Err(Error::InvalidDescriptor("port must be non-zero".into()));
        }

        let account = decode_component(fields[3])?;
        let password = decode_component(fields[4])?;
        let credentials = if account.is_empty() {
            None
        } else {
            Some(Credentials {
                username: account,
                password,
            })
        };

        let shard_group: u32 = fields[5].parse().map_err(|_| {
            Error::InvalidDescriptor(format!("invalid shard group {:?}", fields[5]))
        })?;
        let identity: Identity = fields[6].trim().parse()?;

        Ok(Self {
            public_addr: public_addr.to_string(),
            private_addr,
            port,
            credentials,
            kind,
            shard_group,
            identity,
            health: Health::Up,
            last_edit: timestamp_now_millis(),
        })
    }

    /// Inverse of [`ServiceDescriptor::parse_packed`].
    pub fn to_packed(&self) -> String {
        let (account, password) = match &self.credentials {
            Some(c) => (encode_component(&c.username), encode_component(&c.password)),
            None => (String::new(), String::new()),
        };
        let identity = match self.identity {
            Identity::Master => "master",
            Identity::Servant => "servant",
        };
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.public_addr,
            self.private_addr.as_deref().unwrap_or(""),
            self.port,
            account,
            password,
            self.shard_group,
            identity
        )
    }

    /// Address to dial: private when known, public otherwise.
    pub fn dial_addr(&self) -> Option<&str> {
        self.private_addr
            .as_deref()
            .filter(|a| !a.is_empty())
            .or(Some(self.public_addr.as_str()).filter(|a| !a.is_empty()))
    }

    /// Human-readable `addr:port` used in logs and error reports.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.dial_addr().unwrap_or("<none>"), self.port)
    }

    pub fn identity_key(&self) -> Endpoint<'_> {
        Endpoint {
            private_addr: self.private_addr.as_deref(),
            public_addr: Some(self.public_addr.as_str()),
            port: self.port,
        }
    }

    pub fn same_endpoint(&self, other: &ServiceDescriptor) -> bool {
        endpoints_match(&self.identity_key(), &other.identity_key())
    }

    /// Copy with the password blanked, for read-only views.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(c) = copy.credentials.as_mut() {
            c.password = String::new();
        }
        copy
    }

    pub fn to_document(&self) -> Result<crate::shard::Document> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(Error::Internal("descriptor did not serialize to an object".into())),
        }
    }

    pub fn from_document(doc: &crate::shard::Document) -> Result<Self> {
        let mut doc = doc.clone();
        doc.remove("_id");
        Ok(serde_json::from_value(serde_json::Value::Object(doc))?)
    }
}
